//! Path pattern compilation.
//!
//! Patterns use the `/blog/:slug` family of syntax:
//! * `:name` matches one segment, `:name(regex)` a custom expression
//! * `?`, `*` and `+` after a parameter make it optional, zero-or-more or
//!   one-or-more segments; a leading `/` is folded into the optional part
//! * a bare `(regex)` group is captured under its position (`0`, `1`, ...)
//! * `\` escapes the next character
//!
//! Every pattern compiles to one anchored [`Regex`]. Parameters are stored
//! under synthetic group names so that any parameter name is accepted.
use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

/// Captured parameters, keyed by parameter name.
pub type Params = BTreeMap<String, String>;

const DEFAULT_SEGMENT: &str = "[^/#?]+?";

/// Errors raised while parsing a path pattern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatternError {
    #[error("pattern '{pattern}' must start with '/'")]
    MissingLeadingSlash { pattern: String },

    #[error("pattern '{pattern}': parameter at offset {offset} has no name")]
    EmptyParamName { pattern: String, offset: usize },

    #[error("pattern '{pattern}': unbalanced group starting at offset {offset}")]
    UnbalancedGroup { pattern: String, offset: usize },

    #[error("pattern '{pattern}': duplicate parameter '{name}'")]
    DuplicateParam { pattern: String, name: String },

    #[error("pattern '{pattern}' failed to compile: {message}")]
    InvalidRegex { pattern: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    One,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param {
        name: String,
        pattern: String,
        modifier: Modifier,
        slash_prefix: bool,
    },
}

/// A compiled, anchored path matcher.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    /// (parameter name, regex group name)
    keys: Vec<(String, String)>,
}

impl PathPattern {
    /// Compile a case-insensitive pattern (user rules).
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        Self::compile(source, false)
    }

    /// Compile a case-sensitive pattern (page and data routes).
    pub fn parse_case_sensitive(source: &str) -> Result<Self, PatternError> {
        Self::compile(source, true)
    }

    fn compile(source: &str, case_sensitive: bool) -> Result<Self, PatternError> {
        if !source.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash {
                pattern: source.to_string(),
            });
        }

        let tokens = tokenize(source)?;
        let mut body = String::new();
        let mut keys: Vec<(String, String)> = Vec::new();

        for token in &tokens {
            match token {
                Token::Literal(text) => body.push_str(&regex::escape(text)),
                Token::Param {
                    name,
                    pattern,
                    modifier,
                    slash_prefix,
                } => {
                    if keys.iter().any(|(existing, _)| existing == name) {
                        return Err(PatternError::DuplicateParam {
                            pattern: source.to_string(),
                            name: name.clone(),
                        });
                    }
                    let group = format!("p{}", keys.len());
                    let prefix = if *slash_prefix { "/" } else { "" };
                    let fragment = match modifier {
                        Modifier::One => format!("{prefix}(?P<{group}>{pattern})"),
                        Modifier::Optional => format!("(?:{prefix}(?P<{group}>{pattern}))?"),
                        Modifier::OneOrMore => {
                            format!("{prefix}(?P<{group}>(?:{pattern})(?:/(?:{pattern}))*)")
                        }
                        Modifier::ZeroOrMore => {
                            format!("(?:{prefix}(?P<{group}>(?:{pattern})(?:/(?:{pattern}))*))?")
                        }
                    };
                    body.push_str(&fragment);
                    keys.push((name.clone(), group));
                }
            }
        }

        // A pattern ending in an optional slash-prefixed parameter also
        // accepts the bare trailing slash (`/:path*` matches `/`).
        let trailing = match tokens.last() {
            Some(Token::Param {
                modifier: Modifier::Optional | Modifier::ZeroOrMore,
                slash_prefix: true,
                ..
            }) => "/?",
            _ => "",
        };
        let flags = if case_sensitive { "" } else { "(?i)" };
        let anchored = format!("{flags}^{body}{trailing}$");

        let regex = Regex::new(&anchored).map_err(|e| PatternError::InvalidRegex {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: source.to_string(),
            regex,
            keys,
        })
    }

    /// The pattern text this matcher was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of every parameter the pattern captures, in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match `path` and return captured parameters. Optional parameters that
    /// did not participate are absent from the map.
    pub fn match_path(&self, path: &str) -> Option<Params> {
        let captures = self.regex.captures(path)?;
        let mut params = Params::new();
        for (name, group) in &self.keys {
            if let Some(value) = captures.name(group) {
                params.insert(name.clone(), value.as_str().to_string());
            }
        }
        Some(params)
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, PatternError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut unnamed = 0usize;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                literal.push(chars[i + 1]);
                i += 2;
            }
            ':' => {
                let offset = i;
                i += 1;
                let mut name = String::new();
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    name.push(chars[i]);
                    i += 1;
                }
                if name.is_empty() {
                    return Err(PatternError::EmptyParamName {
                        pattern: source.to_string(),
                        offset,
                    });
                }
                let pattern = if i < chars.len() && chars[i] == '(' {
                    let (group, next) = read_group(&chars, i, source)?;
                    i = next;
                    group
                } else {
                    DEFAULT_SEGMENT.to_string()
                };
                let modifier = read_modifier(&chars, &mut i);
                push_param(&mut tokens, &mut literal, name, pattern, modifier);
            }
            '(' => {
                let (group, next) = read_group(&chars, i, source)?;
                i = next;
                let modifier = read_modifier(&chars, &mut i);
                let name = unnamed.to_string();
                unnamed += 1;
                push_param(&mut tokens, &mut literal, name, group, modifier);
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

fn push_param(
    tokens: &mut Vec<Token>,
    literal: &mut String,
    name: String,
    pattern: String,
    modifier: Modifier,
) {
    let slash_prefix = literal.ends_with('/');
    if slash_prefix {
        literal.pop();
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(std::mem::take(literal)));
    }
    tokens.push(Token::Param {
        name,
        pattern,
        modifier,
        slash_prefix,
    });
}

/// Read a balanced `( ... )` group starting at `start`; returns the inner
/// expression and the index just past the closing parenthesis.
fn read_group(chars: &[char], start: usize, source: &str) -> Result<(String, usize), PatternError> {
    let mut depth = 0usize;
    let mut inner = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                inner.push(c);
                inner.push(chars[i + 1]);
                i += 2;
                continue;
            }
            '(' => {
                depth += 1;
                if depth > 1 {
                    inner.push(c);
                }
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((inner, i + 1));
                }
                inner.push(c);
            }
            _ => inner.push(c),
        }
        i += 1;
    }
    Err(PatternError::UnbalancedGroup {
        pattern: source.to_string(),
        offset: start,
    })
}

fn read_modifier(chars: &[char], i: &mut usize) -> Modifier {
    let modifier = match chars.get(*i) {
        Some('?') => Modifier::Optional,
        Some('*') => Modifier::ZeroOrMore,
        Some('+') => Modifier::OneOrMore,
        _ => return Modifier::One,
    };
    *i += 1;
    modifier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_segment_captures() {
        let pattern = PathPattern::parse("/blog/:slug").unwrap();
        let params = pattern.match_path("/blog/hello").unwrap();
        assert_eq!(params.get("slug").map(String::as_str), Some("hello"));
        assert!(pattern.match_path("/blog/hello/more").is_none());
        assert!(pattern.match_path("/BLOG/x").is_some());
    }

    #[test]
    fn repeated_parameters_fold_the_slash() {
        let pattern = PathPattern::parse("/docs/:path*").unwrap();
        assert!(pattern.is_match("/docs"));
        assert!(pattern.is_match("/docs/"));
        let params = pattern.match_path("/docs/a/b").unwrap();
        assert_eq!(params["path"], "a/b");

        let plus = PathPattern::parse("/docs/:path+").unwrap();
        assert!(!plus.is_match("/docs"));
        assert!(plus.is_match("/docs/a"));
    }

    #[test]
    fn custom_and_unnamed_groups() {
        let pattern = PathPattern::parse("/:locale(en|fr)/(404|500)").unwrap();
        let params = pattern.match_path("/fr/500").unwrap();
        assert_eq!(params["locale"], "fr");
        assert_eq!(params["0"], "500");
        assert!(pattern.match_path("/de/404").is_none());
    }

    #[test]
    fn literal_suffix_after_parameter() {
        let pattern = PathPattern::parse_case_sensitive("/data/:slug.json").unwrap();
        assert_eq!(pattern.match_path("/data/post.json").unwrap()["slug"], "post");
        assert!(pattern.match_path("/data/post.JSON").is_none());
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(matches!(
            PathPattern::parse("blog"),
            Err(PatternError::MissingLeadingSlash { .. })
        ));
        assert!(matches!(
            PathPattern::parse("/a/:"),
            Err(PatternError::EmptyParamName { .. })
        ));
        assert!(matches!(
            PathPattern::parse("/a/(b"),
            Err(PatternError::UnbalancedGroup { .. })
        ));
        assert!(matches!(
            PathPattern::parse("/:a/:a"),
            Err(PatternError::DuplicateParam { .. })
        ));
        assert!(matches!(
            PathPattern::parse("/:a([)"),
            Err(PatternError::InvalidRegex { .. })
        ));
    }
}
