//! Destination templates for redirects and rewrites.
//!
//! A destination such as `/posts/:slug?ref=:source` is parsed once when the
//! table is compiled. Compiling it against a set of captured parameters is a
//! pure function of its inputs.
use std::collections::BTreeSet;

use thiserror::Error;

use super::{
    pattern::Params,
    query::{Query, is_reserved_key},
};
use crate::utils::url::is_absolute_url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DestinationError {
    #[error("destination is empty")]
    Empty,

    #[error("destination '{0}' must be an absolute URL or start with '/'")]
    NotAPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Param(String),
}

/// A run of literal text and parameter references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTemplate(Vec<Piece>);

impl ValueTemplate {
    pub fn parse(raw: &str) -> Self {
        let chars: Vec<char> = raw.chars().collect();
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut i = 0;
        while i < chars.len() {
            let starts_param = chars[i] == ':'
                && chars
                    .get(i + 1)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_');
            if !starts_param {
                literal.push(chars[i]);
                i += 1;
                continue;
            }
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            i += 1;
            let mut name = String::new();
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                name.push(chars[i]);
                i += 1;
            }
            // Repetition modifiers carry no meaning in a destination.
            if matches!(chars.get(i), Some('?' | '*' | '+')) {
                i += 1;
            }
            pieces.push(Piece::Param(name));
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Self(pieces)
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|p| match p {
            Piece::Param(name) => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }

    pub fn render(&self, params: &Params) -> String {
        let mut out = String::new();
        for piece in &self.0 {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Param(name) => {
                    if let Some(value) = params.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }

    fn ends_with_param(&self) -> bool {
        matches!(self.0.last(), Some(Piece::Param(_)))
    }
}

/// How the incoming query and unused captures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Rewrites: unused captures and incoming keys are carried over.
    Passthrough,
    /// Redirects: only the template query and reserved routing keys.
    Explicit,
}

/// A parsed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTemplate {
    raw: String,
    /// `scheme://authority` for external destinations.
    origin: Option<String>,
    path: ValueTemplate,
    query: Vec<(String, ValueTemplate)>,
}

/// The outcome of compiling a destination template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub origin: Option<String>,
    pub path: String,
    pub query: Query,
}

impl Destination {
    pub fn is_external(&self) -> bool {
        self.origin.is_some()
    }

    /// The client-facing URL: reserved keys are never included.
    pub fn public_url(&self) -> String {
        let mut url = self.origin.clone().unwrap_or_default();
        url.push_str(&self.path);
        let public = self.query.without_reserved();
        if !public.is_empty() {
            url.push('?');
            url.push_str(&public.to_query_string());
        }
        url
    }
}

impl DestinationTemplate {
    pub fn parse(raw: &str) -> Result<Self, DestinationError> {
        if raw.is_empty() {
            return Err(DestinationError::Empty);
        }

        let (origin, rest) = if is_absolute_url(raw) {
            split_origin(raw)
        } else if raw.starts_with('/') {
            (None, raw)
        } else {
            return Err(DestinationError::NotAPath(raw.to_string()));
        };

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };

        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode(key), ValueTemplate::parse(value))
            })
            .collect();

        Ok(Self {
            raw: raw.to_string(),
            origin,
            path: ValueTemplate::parse(if path.is_empty() { "/" } else { path }),
            query,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_external(&self) -> bool {
        self.origin.is_some()
    }

    /// Every parameter the template references.
    pub fn param_names(&self) -> BTreeSet<&str> {
        self.path
            .param_names()
            .chain(self.query.iter().flat_map(|(_, v)| v.param_names()))
            .collect()
    }

    /// Substitute `params` and build the final query according to `mode`.
    pub fn compile(&self, params: &Params, incoming: &Query, mode: QueryMode) -> Destination {
        let mut path = self.path.render(params);
        if self.path.ends_with_param() && path.len() > 1 && path.ends_with('/') {
            path.pop();
        }

        let mut query = Query::new();
        for (key, value) in &self.query {
            query.append(key.clone(), decode(&value.render(params)));
        }

        match mode {
            QueryMode::Passthrough => {
                let used = self.param_names();
                for (name, value) in params {
                    if !used.contains(name.as_str()) && !query.contains_key(name) {
                        query.set(name.clone(), decode(value));
                    }
                }
                query.merge_missing(incoming);
            }
            QueryMode::Explicit => {
                for (key, values) in incoming.iter() {
                    if is_reserved_key(key) && !query.contains_key(key) {
                        query.set_all(key, values.to_vec());
                    }
                }
            }
        }

        Destination {
            origin: self.origin.clone(),
            path,
            query,
        }
    }
}

fn split_origin(raw: &str) -> (Option<String>, &str) {
    let after_scheme = raw.find("://").map(|i| i + 3).unwrap_or(0);
    match raw[after_scheme..].find(['/', '?']) {
        Some(i) => {
            let split = after_scheme + i;
            (Some(raw[..split].to_string()), &raw[split..])
        }
        None => (Some(raw.to_string()), "/"),
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}
