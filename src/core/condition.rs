//! `has` / `missing` conditions evaluated against request attributes.
use std::collections::BTreeMap;

use http::HeaderMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{pattern::Params, query::Query};

/// What part of the request a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Header,
    Cookie,
    Query,
    Host,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConditionError {
    #[error("{kind:?} condition requires a key")]
    MissingKey { kind: ConditionKind },

    #[error("host condition requires a value")]
    MissingHostValue,

    #[error("condition value '{value}' is not a valid expression: {message}")]
    InvalidValue { value: String, message: String },
}

/// Cookies parsed from the request's `cookie` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(BTreeMap<String, String>);

impl Cookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = BTreeMap::new();
        for value in headers.get_all(http::header::COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            for pair in value.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    let value = value.trim().trim_matches('"');
                    let decoded = urlencoding::decode(value)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.to_string());
                    cookies.entry(name.trim().to_string()).or_insert(decoded);
                }
            }
        }
        Self(cookies)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// The request attributes a condition can read.
pub struct ConditionInput<'a> {
    pub headers: &'a HeaderMap,
    pub cookies: &'a Cookies,
    pub query: &'a Query,
    pub hostname: &'a str,
}

/// A compiled condition. The optional value is an anchored expression.
#[derive(Debug, Clone)]
pub struct Condition {
    kind: ConditionKind,
    key: String,
    value: Option<Regex>,
}

impl Condition {
    pub fn new(
        kind: ConditionKind,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Self, ConditionError> {
        let key = match (kind, key) {
            (ConditionKind::Host, _) => {
                if value.is_none() {
                    return Err(ConditionError::MissingHostValue);
                }
                String::new()
            }
            (ConditionKind::Header, Some(key)) if !key.is_empty() => key.to_ascii_lowercase(),
            (_, Some(key)) if !key.is_empty() => key.to_string(),
            _ => return Err(ConditionError::MissingKey { kind }),
        };

        let value = value
            .map(|v| {
                Regex::new(&format!("^(?:{v})$")).map_err(|e| ConditionError::InvalidValue {
                    value: v.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self { kind, key, value })
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Named capture groups in the value expression.
    pub fn capture_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .value
            .iter()
            .flat_map(|re| re.capture_names().flatten().map(str::to_string))
            .collect();
        if self.value.is_none() && self.kind != ConditionKind::Host {
            names.push(safe_param_name(&self.key));
        }
        names
    }

    fn candidate<'a>(&self, input: &ConditionInput<'a>) -> Option<&'a str> {
        match self.kind {
            ConditionKind::Header => input
                .headers
                .get(self.key.as_str())
                .and_then(|v| v.to_str().ok()),
            ConditionKind::Cookie => input.cookies.get(&self.key),
            ConditionKind::Query => input.query.get(&self.key),
            ConditionKind::Host => Some(input.hostname),
        }
    }

    /// Test the condition, returning captured parameters on success.
    pub fn evaluate(&self, input: &ConditionInput<'_>) -> Option<Params> {
        let candidate = self.candidate(input)?;
        let mut params = Params::new();
        match &self.value {
            Some(re) => {
                let captures = re.captures(candidate)?;
                for name in re.capture_names().flatten() {
                    if let Some(m) = captures.name(name) {
                        params.insert(name.to_string(), m.as_str().to_string());
                    }
                }
            }
            None => {
                params.insert(safe_param_name(&self.key), candidate.to_string());
            }
        }
        Some(params)
    }
}

/// Evaluate `has` (all must match) and `missing` (none may match). Captures
/// from `has` are returned when the whole set passes.
pub fn evaluate_conditions(
    has: &[Condition],
    missing: &[Condition],
    input: &ConditionInput<'_>,
) -> Option<Params> {
    let mut params = Params::new();
    for condition in has {
        params.extend(condition.evaluate(input)?);
    }
    if missing.iter().any(|c| c.evaluate(input).is_some()) {
        return None;
    }
    Some(params)
}

fn safe_param_name(key: &str) -> String {
    key.chars().filter(char::is_ascii_alphanumeric).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(
        headers: &'a HeaderMap,
        cookies: &'a Cookies,
        query: &'a Query,
        hostname: &'a str,
    ) -> ConditionInput<'a> {
        ConditionInput {
            headers,
            cookies,
            query,
            hostname,
        }
    }

    #[test]
    fn header_value_captures_named_groups() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant", "acme-eu".parse().unwrap());
        let cookies = Cookies::default();
        let query = Query::new();

        let cond = Condition::new(
            ConditionKind::Header,
            Some("x-tenant"),
            Some("(?P<tenant>[a-z]+)-eu"),
        )
        .unwrap();
        let params = cond
            .evaluate(&input(&headers, &cookies, &query, "example.com"))
            .unwrap();
        assert_eq!(params["tenant"], "acme");
    }

    #[test]
    fn keyless_capture_uses_sanitized_key() {
        let headers = HeaderMap::new();
        let cookies = Cookies::default();
        let query = Query::parse("ab-test=variant");
        let cond = Condition::new(ConditionKind::Query, Some("ab-test"), None).unwrap();
        let params = cond
            .evaluate(&input(&headers, &cookies, &query, "h"))
            .unwrap();
        assert_eq!(params["abtest"], "variant");
    }

    #[test]
    fn missing_blocks_the_match() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "SW_LOCALE=fr; other=1".parse().unwrap());
        let cookies = Cookies::from_headers(&headers);
        let query = Query::new();
        let ctx = input(&headers, &cookies, &query, "example.fr");

        let has = [Condition::new(ConditionKind::Cookie, Some("SW_LOCALE"), Some("fr")).unwrap()];
        let missing = [Condition::new(ConditionKind::Host, None, Some("example\\.fr")).unwrap()];
        assert!(evaluate_conditions(&has, &[], &ctx).is_some());
        assert!(evaluate_conditions(&has, &missing, &ctx).is_none());
    }

    #[test]
    fn value_expressions_are_anchored() {
        let headers = HeaderMap::new();
        let cookies = Cookies::default();
        let query = Query::parse("mode=preview-all");
        let cond = Condition::new(ConditionKind::Query, Some("mode"), Some("preview")).unwrap();
        assert!(cond.evaluate(&input(&headers, &cookies, &query, "h")).is_none());
    }

    #[test]
    fn rejects_incomplete_conditions() {
        assert_eq!(
            Condition::new(ConditionKind::Header, None, None).unwrap_err(),
            ConditionError::MissingKey {
                kind: ConditionKind::Header
            }
        );
        assert_eq!(
            Condition::new(ConditionKind::Host, None, None).unwrap_err(),
            ConditionError::MissingHostValue
        );
    }
}
