//! Locale detection helpers.
use serde::{Deserialize, Serialize};

/// A domain that serves a fixed default locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainLocale {
    pub domain: String,
    pub default_locale: String,
    #[serde(default)]
    pub locales: Vec<String>,
    /// Serve over plain `http` when redirecting to this domain.
    #[serde(default)]
    pub http: bool,
}

/// Locale settings carried by a compiled table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleSettings {
    pub locales: Vec<String>,
    pub default_locale: String,
    pub domains: Vec<DomainLocale>,
    pub detection: bool,
}

impl LocaleSettings {
    /// The default locale for `hostname`, falling back to the global default.
    pub fn default_for_host(&self, hostname: Option<&str>) -> &str {
        hostname
            .and_then(|host| detect_domain_locale(&self.domains, host))
            .map(|domain| domain.default_locale.as_str())
            .unwrap_or(&self.default_locale)
    }

    /// The configured spelling of `candidate`, matched case-insensitively.
    pub fn canonical<'a>(&'a self, candidate: &str) -> Option<&'a str> {
        self.locales
            .iter()
            .find(|l| l.eq_ignore_ascii_case(candidate))
            .map(String::as_str)
    }
}

/// Result of stripping a locale segment from a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalePath {
    pub pathname: String,
    pub detected: Option<String>,
}

/// Strip a leading locale segment from `path` if the first segment names one
/// of `locales` (case-insensitively).
pub fn normalize_locale_path(path: &str, locales: &[String]) -> LocalePath {
    let mut segments = path.splitn(3, '/');
    segments.next();
    let first = segments.next().unwrap_or_default();
    let rest = segments.next();

    match locales.iter().find(|l| l.eq_ignore_ascii_case(first)) {
        Some(locale) if !first.is_empty() => LocalePath {
            pathname: match rest {
                Some(rest) => format!("/{rest}"),
                None => "/".to_string(),
            },
            detected: Some(locale.clone()),
        },
        _ => LocalePath {
            pathname: path.to_string(),
            detected: None,
        },
    }
}

/// Find the domain locale configured for `hostname` (port ignored).
pub fn detect_domain_locale<'a>(
    domains: &'a [DomainLocale],
    hostname: &str,
) -> Option<&'a DomainLocale> {
    let hostname = hostname.split(':').next().unwrap_or_default();
    domains.iter().find(|d| {
        let domain = d.domain.split(':').next().unwrap_or_default();
        domain.eq_ignore_ascii_case(hostname)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locales() -> Vec<String> {
        vec!["en".into(), "fr".into(), "nl-NL".into()]
    }

    #[test]
    fn strips_locale_segment_case_insensitively() {
        let result = normalize_locale_path("/NL-nl/about", &locales());
        assert_eq!(result.pathname, "/about");
        assert_eq!(result.detected.as_deref(), Some("nl-NL"));

        let root = normalize_locale_path("/fr", &locales());
        assert_eq!(root.pathname, "/");
        assert_eq!(root.detected.as_deref(), Some("fr"));
    }

    #[test]
    fn leaves_unknown_prefixes_alone() {
        let result = normalize_locale_path("/french/about", &locales());
        assert_eq!(result.pathname, "/french/about");
        assert!(result.detected.is_none());
        assert_eq!(normalize_locale_path("/", &locales()).pathname, "/");
    }

    #[test]
    fn domain_lookup_ignores_ports() {
        let domains = vec![DomainLocale {
            domain: "example.fr".into(),
            default_locale: "fr".into(),
            locales: vec![],
            http: false,
        }];
        assert!(detect_domain_locale(&domains, "EXAMPLE.fr:443").is_some());
        assert!(detect_domain_locale(&domains, "example.com").is_none());
    }
}
