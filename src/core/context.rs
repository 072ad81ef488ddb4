//! Per-resolution mutable state.
use std::collections::HashSet;

use http::{HeaderMap, Method, header};
use once_cell::unsync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{
    condition::{ConditionInput, Cookies},
    destination::Destination,
    headers::ResponseHeaders,
    locale::normalize_locale_path,
    query::{DEFAULT_LOCALE_KEY, LOCALE_KEY, Query},
    request::{InboundRequest, ReplayableBody},
    route_table::TableSettings,
};
use crate::utils::url::{add_path_prefix, has_path_prefix, split_path_query, strip_path_prefix};

/// Locale the current path is being resolved in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleState {
    /// Locale named by the request path, if any.
    pub detected: Option<String>,
    /// Default locale for the request's domain.
    pub default_locale: String,
    /// Locale currently in effect.
    pub current: String,
}

/// State threaded through one resolution.
#[derive(Debug)]
pub struct ResolutionContext {
    pub method: Method,
    pub path: String,
    pub query: Query,
    pub request_headers: HeaderMap,
    pub response_headers: ResponseHeaders,
    pub body: ReplayableBody,
    pub rewritten: bool,
    /// Dynamic-route names already attempted.
    pub visited: HashSet<String>,
    pub middleware_invoked: bool,
    pub locale: Option<LocaleState>,
    /// `scheme://host[:port]` the client addressed.
    pub origin: String,
    /// Absolute URL of the request as received.
    pub initial_url: String,
    /// Path the client requested, before any internal rewrite.
    pub public_path: String,
    pub hostname: String,
    pub cancellation: CancellationToken,
    cookies: OnceCell<Cookies>,
}

impl ResolutionContext {
    /// Seed a context from the inbound request: origin, query, and locale
    /// detection with the invisible default-locale prefix.
    pub fn seed(request: InboundRequest, settings: &TableSettings) -> Self {
        let (path, raw_query) = split_path_query(&request.target);
        let path = if path.is_empty() { "/" } else { path }.to_string();
        // Clients never get to set routing state.
        let query = Query::parse(raw_query).without_reserved();

        let host = request_host(&request, settings);
        let scheme = request_scheme(&request, settings);
        let origin = format!("{scheme}://{host}");
        let initial_url = format!("{origin}{}", request.target);
        let hostname = host.split(':').next().unwrap_or_default().to_string();

        let mut ctx = Self {
            method: request.method,
            public_path: path.clone(),
            path,
            query,
            request_headers: request.headers,
            response_headers: ResponseHeaders::new(),
            body: request.body,
            rewritten: false,
            visited: HashSet::new(),
            middleware_invoked: false,
            locale: None,
            origin,
            initial_url,
            hostname,
            cancellation: request.cancellation,
            cookies: OnceCell::new(),
        };
        ctx.detect_locale(settings, true);
        ctx
    }

    pub fn cookies(&self) -> &Cookies {
        self.cookies
            .get_or_init(|| Cookies::from_headers(&self.request_headers))
    }

    /// Replace the request headers; cached cookies are dropped.
    pub fn replace_request_headers(&mut self, headers: HeaderMap) {
        self.request_headers = headers;
        self.cookies = OnceCell::new();
    }

    pub fn condition_input(&self) -> ConditionInput<'_> {
        ConditionInput {
            headers: &self.request_headers,
            cookies: self.cookies(),
            query: &self.query,
            hostname: &self.hostname,
        }
    }

    /// Adopt a compiled internal destination as the current path and query.
    pub fn apply_destination(&mut self, destination: Destination) {
        self.path = destination.path;
        self.query = destination.query;
    }

    /// Current path with the default locale segment removed.
    pub fn internal_path(&self, settings: &TableSettings) -> String {
        match &self.locale {
            Some(state) => strip_locale(&self.path, &settings.base_path, &state.default_locale),
            None => self.path.clone(),
        }
    }

    /// Give an unprefixed path the locale currently in effect, then
    /// re-detect. Used when a path arrives from outside the table.
    pub fn localize_path(&mut self, settings: &TableSettings) {
        if let (Some(i18n), Some(state)) = (&settings.i18n, &self.locale) {
            if let Some(rest) = strip_path_prefix(&self.path, &settings.base_path) {
                let unprefixed = normalize_locale_path(rest, &i18n.locales).detected.is_none();
                if unprefixed && !is_internal_asset(&self.path, settings) {
                    let prefixed = add_path_prefix(rest, &format!("/{}", state.current));
                    self.path = add_path_prefix(&prefixed, &settings.base_path);
                }
            }
        }
        self.redetect_locale(settings);
    }

    /// Re-run locale detection after the path changed.
    pub fn redetect_locale(&mut self, settings: &TableSettings) {
        self.detect_locale(settings, false);
    }

    fn detect_locale(&mut self, settings: &TableSettings, initial: bool) {
        let Some(i18n) = &settings.i18n else {
            return;
        };
        let default_locale = i18n.default_for_host(Some(&self.hostname)).to_string();

        let Some(rest) = strip_path_prefix(&self.path, &settings.base_path) else {
            // Outside the base path: no locale to detect, but error pages
            // still expand the locale keys.
            let current = self
                .locale
                .as_ref()
                .map_or_else(|| default_locale.clone(), |state| state.current.clone());
            self.query.set(LOCALE_KEY, current.clone());
            self.query.set(DEFAULT_LOCALE_KEY, default_locale.clone());
            let detected = self.locale.as_ref().and_then(|s| s.detected.clone());
            self.locale = Some(LocaleState {
                detected,
                default_locale,
                current,
            });
            return;
        };
        let stripped = normalize_locale_path(rest, &i18n.locales);

        let current = match &stripped.detected {
            Some(locale) => locale.clone(),
            None if initial => {
                if !is_internal_asset(&self.path, settings) {
                    let prefixed = add_path_prefix(rest, &format!("/{default_locale}"));
                    self.path = add_path_prefix(&prefixed, &settings.base_path);
                }
                default_locale.clone()
            }
            // A rewrite to an unprefixed path keeps the locale in effect.
            None => match &self.locale {
                Some(state) => state.current.clone(),
                None => default_locale.clone(),
            },
        };

        self.query.set(LOCALE_KEY, current.clone());
        self.query.set(DEFAULT_LOCALE_KEY, default_locale.clone());
        self.locale = Some(LocaleState {
            detected: if initial {
                stripped.detected
            } else {
                self.locale.as_ref().and_then(|s| s.detected.clone())
            },
            default_locale,
            current,
        });
    }
}

/// Framework-owned paths (static assets, data routes) never carry a locale.
pub fn is_internal_asset(path: &str, settings: &TableSettings) -> bool {
    has_path_prefix(
        path,
        &format!("{}{}", settings.base_path, settings.internal_prefix),
    )
}

/// Remove `/{locale}` directly after the base path.
pub fn strip_locale(path: &str, base_path: &str, locale: &str) -> String {
    let prefix = format!("{base_path}/{locale}");
    match path.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(&prefix) => {
            let rest = &path[prefix.len()..];
            if rest.is_empty() {
                add_path_prefix("/", base_path)
            } else if rest.starts_with('/') {
                format!("{base_path}{rest}")
            } else {
                path.to_string()
            }
        }
        _ => path.to_string(),
    }
}

fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn request_host(request: &InboundRequest, settings: &TableSettings) -> String {
    if settings.trust_host_header {
        let forwarded = first_value(&request.headers, "x-forwarded-host");
        let host = forwarded.or_else(|| first_value(&request.headers, header::HOST.as_str()));
        if let Some(host) = host {
            return host.to_string();
        }
    }
    match request.connection.local_port {
        Some(port) => format!("{}:{port}", settings.hostname),
        None => settings.hostname.clone(),
    }
}

fn request_scheme(request: &InboundRequest, settings: &TableSettings) -> &'static str {
    if request.connection.encrypted {
        return "https";
    }
    if settings.trust_host_header
        && first_value(&request.headers, "x-forwarded-proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
    {
        return "https";
    }
    "http"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::locale::LocaleSettings;

    fn localized() -> TableSettings {
        TableSettings {
            i18n: Some(LocaleSettings {
                locales: vec!["en".into(), "fr".into()],
                default_locale: "en".into(),
                domains: vec![],
                detection: true,
            }),
            ..TableSettings::default()
        }
    }

    #[test]
    fn default_locale_is_prefixed_invisibly() {
        let ctx = ResolutionContext::seed(InboundRequest::get("/"), &localized());
        assert_eq!(ctx.path, "/en");
        assert_eq!(ctx.public_path, "/");
        assert_eq!(ctx.query.get(LOCALE_KEY), Some("en"));
        assert_eq!(ctx.internal_path(&localized()), "/");
    }

    #[test]
    fn explicit_locale_is_detected() {
        let ctx = ResolutionContext::seed(InboundRequest::get("/fr/about?x=1"), &localized());
        assert_eq!(ctx.path, "/fr/about");
        let state = ctx.locale.as_ref().unwrap();
        assert_eq!(state.detected.as_deref(), Some("fr"));
        assert_eq!(state.current, "fr");
        assert_eq!(ctx.query.get("x"), Some("1"));
    }

    #[test]
    fn internal_prefix_paths_are_not_prefixed() {
        let ctx = ResolutionContext::seed(InboundRequest::get("/_sw/static/app.js"), &localized());
        assert_eq!(ctx.path, "/_sw/static/app.js");
    }

    #[test]
    fn client_supplied_reserved_keys_are_dropped() {
        let ctx = ResolutionContext::seed(
            InboundRequest::get("/a?__sw_locale=fr&__sw_data=1&b=2"),
            &TableSettings::default(),
        );
        assert!(ctx.query.get(LOCALE_KEY).is_none());
        assert!(ctx.query.get("__sw_data").is_none());
        assert_eq!(ctx.query.get("b"), Some("2"));
    }

    #[test]
    fn origin_follows_forwarded_headers_when_trusted() {
        let request = InboundRequest::get("/old?q=1")
            .header("host", "internal:3000")
            .header("x-forwarded-host", "example.com")
            .header("x-forwarded-proto", "https");
        let ctx = ResolutionContext::seed(request.clone(), &TableSettings::default());
        assert_eq!(ctx.initial_url, "https://example.com/old?q=1");
        assert_eq!(ctx.hostname, "example.com");

        let untrusted = TableSettings {
            trust_host_header: false,
            hostname: "canonical.test".into(),
            ..TableSettings::default()
        };
        let ctx = ResolutionContext::seed(request, &untrusted);
        assert_eq!(ctx.origin, "http://canonical.test");
    }

    #[test]
    fn cookies_are_reparsed_after_header_override() {
        let mut ctx = ResolutionContext::seed(
            InboundRequest::get("/").header("cookie", "a=1"),
            &TableSettings::default(),
        );
        assert_eq!(ctx.cookies().get("a"), Some("1"));
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "a=2".parse().unwrap());
        ctx.replace_request_headers(headers);
        assert_eq!(ctx.cookies().get("a"), Some("2"));
    }

    #[test]
    fn strip_locale_respects_segments() {
        assert_eq!(strip_locale("/en/about", "", "en"), "/about");
        assert_eq!(strip_locale("/en", "", "en"), "/");
        assert_eq!(strip_locale("/docs/en", "/docs", "en"), "/docs");
        assert_eq!(strip_locale("/english", "", "en"), "/english");
    }
}
