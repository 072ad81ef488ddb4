use std::{collections::HashSet, net::SocketAddr};

use crate::{
    config::models::{
        I18nConfig, MiddlewareWorkerConfig, RedirectRule, RewriteRule, RoutingConfig,
        ServerConfig,
    },
    core::RouteTable,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid i18n configuration: {message}")]
    InvalidI18n { message: String },

    #[error("Route table does not compile: {message}")]
    Compile { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Some(dir) = &config.public_dir {
            if !std::path::Path::new(dir).is_dir() {
                errors.push(ValidationError::InvalidField {
                    field: "public_dir".to_string(),
                    message: format!("Directory '{dir}' does not exist"),
                });
            }
        }

        for page in &config.pages {
            if !page.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("pages: {page}"),
                    message: "Page names must start with '/'".to_string(),
                });
            }
        }

        if config.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        match &config.middleware_worker {
            Some(worker) => errors.extend(Self::validate_worker(worker)),
            None if !config.routing.middleware.is_empty() => {
                errors.push(ValidationError::InvalidField {
                    field: "middleware_worker".to_string(),
                    message: "Middleware matchers are configured but no worker is".to_string(),
                });
            }
            None => {}
        }

        errors.extend(Self::validate_routing(&config.routing));

        // Only worth compiling once the rules look sane on their own.
        if errors.is_empty() {
            if let Err(e) = RouteTable::compile(&config.routing) {
                errors.push(ValidationError::Compile {
                    message: e.to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_worker(worker: &MiddlewareWorkerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = Self::validate_url(&worker.endpoint, "middleware_worker.endpoint") {
            errors.push(e);
        }
        if !worker.ready_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "middleware_worker.ready_path".to_string(),
                message: "Must start with '/'".to_string(),
            });
        }
        match humantime::parse_duration(&worker.timeout) {
            Ok(timeout) if timeout.is_zero() => errors.push(ValidationError::InvalidField {
                field: "middleware_worker.timeout".to_string(),
                message: "Must be greater than 0".to_string(),
            }),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidField {
                field: "middleware_worker.timeout".to_string(),
                message: format!("Invalid duration '{}': {e}", worker.timeout),
            }),
        }
        errors
    }

    fn validate_routing(routing: &RoutingConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let base = &routing.base_path;
        if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
            errors.push(ValidationError::InvalidField {
                field: "routing.base_path".to_string(),
                message: "Must be empty or start with '/' and not end with '/'".to_string(),
            });
        }

        if !routing.trust_host_header {
            if let Err(e) = Self::validate_host(&routing.hostname, "routing.hostname") {
                errors.push(e);
            }
        }

        for rule in &routing.headers {
            if let Err(e) = Self::validate_source(&rule.source, "header rule") {
                errors.push(e);
            }
            for header in &rule.headers {
                if http::HeaderName::from_bytes(header.key.as_bytes()).is_err() {
                    errors.push(ValidationError::InvalidField {
                        field: format!("header rule '{}'", rule.source),
                        message: format!("Invalid header name '{}'", header.key),
                    });
                }
            }
        }

        for rule in &routing.redirects {
            errors.extend(Self::validate_redirect(rule));
        }

        let rewrites = routing
            .rewrites
            .before_files
            .iter()
            .chain(&routing.rewrites.after_files)
            .chain(&routing.rewrites.fallback);
        for rule in rewrites {
            errors.extend(Self::validate_rewrite(rule));
        }

        let mut pages = HashSet::new();
        for route in &routing.dynamic_routes {
            if !route.page.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("dynamic route '{}'", route.page),
                    message: "Page names must start with '/'".to_string(),
                });
            }
            if !pages.insert(route.page.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("dynamic route '{}'", route.page),
                    message: "Declared more than once".to_string(),
                });
            }
        }

        for matcher in &routing.middleware {
            if let Err(e) = Self::validate_source(&matcher.source, "middleware matcher") {
                errors.push(e);
            }
        }

        if let Some(i18n) = &routing.i18n {
            errors.extend(Self::validate_i18n(i18n));
        }

        errors
    }

    fn validate_redirect(rule: &RedirectRule) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = Self::validate_source(&rule.source, "redirect") {
            errors.push(e);
        }
        if !Self::is_valid_redirect_status_code(rule.status()) {
            errors.push(ValidationError::InvalidField {
                field: format!("redirect '{}' status_code", rule.source),
                message: format!(
                    "Status code {} is not a valid redirect code. Use 301, 302, 303, 307, or 308",
                    rule.status()
                ),
            });
        }
        if let Err(e) = Self::validate_destination(&rule.destination, &rule.source) {
            errors.push(e);
        }
        errors
    }

    fn validate_rewrite(rule: &RewriteRule) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = Self::validate_source(&rule.source, "rewrite") {
            errors.push(e);
        }
        if let Err(e) = Self::validate_destination(&rule.destination, &rule.source) {
            errors.push(e);
        }
        errors
    }

    fn validate_i18n(i18n: &I18nConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if i18n.locales.is_empty() {
            errors.push(ValidationError::InvalidI18n {
                message: "At least one locale is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for locale in &i18n.locales {
            if !seen.insert(locale.to_ascii_lowercase()) {
                errors.push(ValidationError::InvalidI18n {
                    message: format!("Locale '{locale}' is listed more than once"),
                });
            }
        }

        let known = |locale: &str| i18n.locales.iter().any(|l| l.eq_ignore_ascii_case(locale));
        if !known(&i18n.default_locale) {
            errors.push(ValidationError::InvalidI18n {
                message: format!(
                    "Default locale '{}' is not one of the locales",
                    i18n.default_locale
                ),
            });
        }

        for domain in &i18n.domains {
            if let Err(e) = Self::validate_host(&domain.domain, "i18n.domains") {
                errors.push(e);
            }
            if !known(&domain.default_locale) {
                errors.push(ValidationError::InvalidI18n {
                    message: format!(
                        "Domain '{}' defaults to unknown locale '{}'",
                        domain.domain, domain.default_locale
                    ),
                });
            }
        }
        errors
    }

    fn validate_source(source: &str, context: &str) -> ValidationResult<()> {
        if !source.starts_with('/') {
            return Err(ValidationError::InvalidField {
                field: format!("{context} '{source}'"),
                message: "Sources must start with '/'".to_string(),
            });
        }
        Ok(())
    }

    /// Destinations are either paths or absolute http(s) URLs.
    fn validate_destination(destination: &str, source: &str) -> ValidationResult<()> {
        if destination.starts_with('/') {
            return Ok(());
        }
        Self::validate_url(destination, &format!("rule '{source}' destination"))
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Check if status code is valid for redirects
    fn is_valid_redirect_status_code(code: u16) -> bool {
        matches!(code, 301 | 302 | 303 | 307 | 308)
    }

    /// Validate a bare host name, optionally with a port.
    fn validate_host(host: &str, field: &str) -> ValidationResult<()> {
        if host.is_empty() {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Host cannot be empty".to_string(),
            });
        }

        if host.contains("://") {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')".to_string(),
            });
        }

        let name = host.split(':').next().unwrap_or_default();
        if url::Host::parse(name).is_err() {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid hostname format: '{host}'"),
            });
        }

        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
