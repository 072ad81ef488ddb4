//! Configuration data structures for switchyard.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files. They are
//! serde-friendly and include defaults so that minimal configs remain concise.
//! `RoutingConfig` is the input of the route table compiler; `ServerConfig` wraps it
//! with the settings the bundled server needs.
use serde::{Deserialize, Serialize};

use crate::core::{condition::ConditionKind, locale::DomainLocale};

fn default_true() -> bool {
    true
}

fn default_redirect_status() -> u16 {
    307
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_worker_timeout() -> String {
    "10s".to_string()
}

fn default_ready_path() -> String {
    "/_sw/ready".to_string()
}

/// A `has` / `missing` predicate on a rule.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RuleCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// Header, cookie or query key. Not used for `host`.
    #[serde(default)]
    pub key: Option<String>,
    /// Regular expression the value must match in full. May contain named groups.
    #[serde(default)]
    pub value: Option<String>,
}

/// A single header to set on the response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HeaderValueConfig {
    pub key: String,
    pub value: String,
}

/// Response headers applied to every path matching `source`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub source: String,
    pub headers: Vec<HeaderValueConfig>,
    #[serde(default)]
    pub has: Vec<RuleCondition>,
    #[serde(default)]
    pub missing: Vec<RuleCondition>,
    /// Set to `false` to match without the base path.
    #[serde(default)]
    pub base_path: Option<bool>,
    /// Set to `false` to match without the locale prefix.
    #[serde(default)]
    pub locale: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RedirectRule {
    pub source: String,
    pub destination: String,
    /// 301, 302, 303, 307 or 308. `permanent` takes precedence when set.
    #[serde(default = "default_redirect_status")]
    pub status_code: u16,
    #[serde(default)]
    pub permanent: Option<bool>,
    #[serde(default)]
    pub has: Vec<RuleCondition>,
    #[serde(default)]
    pub missing: Vec<RuleCondition>,
    #[serde(default)]
    pub base_path: Option<bool>,
    #[serde(default)]
    pub locale: Option<bool>,
}

impl RedirectRule {
    /// A temporary (307) redirect with no conditions.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            status_code: default_redirect_status(),
            permanent: None,
            has: Vec::new(),
            missing: Vec::new(),
            base_path: None,
            locale: None,
        }
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = Some(true);
        self
    }

    pub fn status(&self) -> u16 {
        match self.permanent {
            Some(true) => 308,
            Some(false) => 307,
            None => self.status_code,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub has: Vec<RuleCondition>,
    #[serde(default)]
    pub missing: Vec<RuleCondition>,
    #[serde(default)]
    pub base_path: Option<bool>,
    #[serde(default)]
    pub locale: Option<bool>,
}

impl RewriteRule {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            has: Vec::new(),
            missing: Vec::new(),
            base_path: None,
            locale: None,
        }
    }

    pub fn with_has(mut self, condition: RuleCondition) -> Self {
        self.has.push(condition);
        self
    }
}

/// Rewrites split by when they run relative to the filesystem.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RewriteGroups {
    pub before_files: Vec<RewriteRule>,
    pub after_files: Vec<RewriteRule>,
    pub fallback: Vec<RewriteRule>,
}

/// A page served at a parameterised path, e.g. `/blog/:slug` for `/blog/[slug]`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DynamicRouteDescriptor {
    /// Page name; also the artifact path the route resolves to.
    pub page: String,
    pub pattern: String,
    /// Maps a pattern parameter to the query key the page receives it as.
    /// Defaults to the parameter's own name.
    #[serde(default)]
    pub route_keys: std::collections::BTreeMap<String, String>,
}

impl DynamicRouteDescriptor {
    pub fn new(page: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            pattern: pattern.into(),
            route_keys: Default::default(),
        }
    }
}

/// Middleware runs for every path matching `source`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MiddlewareMatcher {
    pub source: String,
    #[serde(default)]
    pub has: Vec<RuleCondition>,
    #[serde(default)]
    pub missing: Vec<RuleCondition>,
}

impl MiddlewareMatcher {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            has: Vec::new(),
            missing: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct I18nConfig {
    pub locales: Vec<String>,
    pub default_locale: String,
    #[serde(default)]
    pub domains: Vec<DomainLocale>,
    #[serde(default = "default_true")]
    pub locale_detection: bool,
}

/// Everything the route table compiler consumes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Path prefix the whole site is mounted under, e.g. `/docs`.
    pub base_path: String,
    pub trailing_slash: bool,
    pub build_id: String,
    /// Prefix for framework-owned paths (static assets, data routes).
    pub internal_prefix: String,
    pub trust_host_header: bool,
    /// Host used when the inbound host header is not trusted.
    pub hostname: String,
    /// Filesystem and dynamic-route matches terminate without a prior rewrite.
    pub fs_routes_authoritative: bool,
    pub not_found_page: String,
    pub error_page: String,
    /// Paths that exist on disk but must never be served.
    pub private_outputs: Vec<String>,
    pub headers: Vec<HeaderRule>,
    pub redirects: Vec<RedirectRule>,
    pub rewrites: RewriteGroups,
    /// Most specific first; the order is kept as-is.
    pub dynamic_routes: Vec<DynamicRouteDescriptor>,
    /// Pages that have a JSON data route.
    pub data_routes: Vec<DynamicRouteDescriptor>,
    pub i18n: Option<I18nConfig>,
    pub middleware: Vec<MiddlewareMatcher>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            trailing_slash: false,
            build_id: "development".to_string(),
            internal_prefix: "/_sw".to_string(),
            trust_host_header: true,
            hostname: "localhost".to_string(),
            fs_routes_authoritative: true,
            not_found_page: "/404".to_string(),
            error_page: "/500".to_string(),
            private_outputs: Vec::new(),
            headers: Vec::new(),
            redirects: Vec::new(),
            rewrites: RewriteGroups::default(),
            dynamic_routes: Vec::new(),
            data_routes: Vec::new(),
            i18n: None,
            middleware: Vec::new(),
        }
    }
}

/// Out-of-process middleware worker reached over HTTP.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MiddlewareWorkerConfig {
    /// Base URL of the worker, e.g. `http://127.0.0.1:9001`.
    pub endpoint: String,
    /// Probed once before the first invocation.
    #[serde(default = "default_ready_path")]
    pub ready_path: String,
    /// Per-invocation timeout, parsed by humantime ("500ms", "10s").
    #[serde(default = "default_worker_timeout")]
    pub timeout: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory holding static files and built pages.
    #[serde(default)]
    pub public_dir: Option<String>,
    /// Page artifacts known to the server, e.g. `/about`, `/blog/[slug]`.
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub middleware_worker: Option<MiddlewareWorkerConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            public_dir: None,
            pages: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            middleware_worker: None,
            routing: RoutingConfig::default(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
    public_dir: Option<String>,
    pages: Vec<String>,
    middleware_worker: Option<MiddlewareWorkerConfig>,
    routing: Option<RoutingConfig>,
}

impl ServerConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn public_dir(mut self, dir: impl Into<String>) -> Self {
        self.public_dir = Some(dir.into());
        self
    }

    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.pages.push(page.into());
        self
    }

    pub fn middleware_worker(mut self, endpoint: impl Into<String>) -> Self {
        self.middleware_worker = Some(MiddlewareWorkerConfig {
            endpoint: endpoint.into(),
            ready_path: default_ready_path(),
            timeout: default_worker_timeout(),
        });
        self
    }

    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> Result<ServerConfig, String> {
        let listen_addr = self
            .listen_addr
            .ok_or_else(|| "listen_addr is required".to_string())?;

        Ok(ServerConfig {
            listen_addr,
            public_dir: self.public_dir,
            pages: self.pages,
            max_body_bytes: default_max_body_bytes(),
            middleware_worker: self.middleware_worker,
            routing: self.routing.unwrap_or_default(),
        })
    }
}
