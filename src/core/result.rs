use axum::body::Body as AxumBody;
use http::HeaderMap;

use super::{context::ResolutionContext, headers::ResponseHeaders, query::Query};
use crate::ports::artifact_store::{Artifact, ArtifactKind};

/// How a resolution ended, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Redirect,
    External,
    MiddlewareResponse,
    Artifact,
    NotFound,
    Error,
    Fault,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Redirect => "redirect",
            Outcome::External => "external",
            Outcome::MiddlewareResponse => "middleware_response",
            Outcome::Artifact => "artifact",
            Outcome::NotFound => "not_found",
            Outcome::Error => "error",
            Outcome::Fault => "fault",
        }
    }
}

/// What the caller should do with the request.
///
/// `finished` means the resolver produced the whole response (status,
/// headers and possibly `body`). Otherwise the caller renders
/// `matched_artifact` for `path` and `query` with `status_code`.
#[derive(Debug)]
pub struct ResolutionResult {
    pub finished: bool,
    pub status_code: Option<u16>,
    pub response_headers: ResponseHeaders,
    pub path: String,
    pub query: Query,
    /// Path the client requested.
    pub public_path: String,
    pub matched_artifact: Option<Artifact>,
    /// Request headers after middleware overrides.
    pub request_headers: HeaderMap,
    /// Response body produced by middleware.
    pub body: Option<AxumBody>,
    /// Set when the result stands in for a failure.
    pub fault: Option<String>,
    pub outcome: Outcome,
}

impl ResolutionResult {
    fn from_context(ctx: &ResolutionContext, outcome: Outcome) -> Self {
        Self {
            finished: false,
            status_code: None,
            response_headers: ctx.response_headers.clone(),
            path: ctx.path.clone(),
            query: ctx.query.clone(),
            public_path: ctx.public_path.clone(),
            matched_artifact: None,
            request_headers: ctx.request_headers.clone(),
            body: None,
            fault: None,
            outcome,
        }
    }

    /// The raw request target needs slash normalization: answered before
    /// any routing state exists.
    pub fn normalization_redirect(target: &str, location: &str, request_headers: HeaderMap) -> Self {
        let mut response_headers = ResponseHeaders::new();
        response_headers.set("location", location);
        let (path, query) = crate::utils::url::split_path_query(target);
        Self {
            finished: true,
            status_code: Some(308),
            response_headers,
            path: path.to_string(),
            query: Query::parse(query),
            public_path: path.to_string(),
            matched_artifact: None,
            request_headers,
            body: None,
            fault: None,
            outcome: Outcome::Redirect,
        }
    }

    /// A redirect to `location` (already public: no reserved query keys).
    pub fn redirect(ctx: &ResolutionContext, status: u16, location: &str) -> Self {
        let mut result = Self::from_context(ctx, Outcome::Redirect);
        result.finished = true;
        result.status_code = Some(status);
        result.response_headers.set("location", location);
        result
    }

    /// A rewrite to a foreign origin; the caller proxies `url`.
    pub fn external(ctx: &ResolutionContext, url: String) -> Self {
        let mut result = Self::from_context(ctx, Outcome::External);
        result.finished = true;
        result.path = url.clone();
        result.query = Query::new();
        result.matched_artifact = Some(Artifact::new(url, ArtifactKind::External));
        result
    }

    pub fn artifact(ctx: &ResolutionContext, artifact: Artifact) -> Self {
        let mut result = Self::from_context(ctx, Outcome::Artifact);
        result.status_code = Some(200);
        result.matched_artifact = Some(artifact);
        result
    }

    /// An error page rendered at `page_path` with `status`.
    pub fn error_page(
        ctx: &ResolutionContext,
        status: u16,
        page_path: String,
        artifact: Artifact,
    ) -> Self {
        let outcome = if status == 404 {
            Outcome::NotFound
        } else {
            Outcome::Error
        };
        let mut result = Self::from_context(ctx, outcome);
        result.status_code = Some(status);
        result.path = page_path;
        result.matched_artifact = Some(artifact);
        result
    }

    /// The middleware answered the request itself.
    pub fn middleware_response(ctx: &ResolutionContext, status: u16, body: AxumBody) -> Self {
        let mut result = Self::from_context(ctx, Outcome::MiddlewareResponse);
        result.finished = true;
        result.status_code = Some(status);
        result.body = Some(body);
        result
    }

    pub fn is_redirect(&self) -> bool {
        self.outcome == Outcome::Redirect
    }

    pub fn location(&self) -> Option<&str> {
        self.response_headers.get("location")
    }

    /// JSON summary for logs, the CLI and the bundled server.
    pub fn describe(&self) -> serde_json::Value {
        let headers: serde_json::Map<_, _> = self
            .response_headers
            .iter()
            .map(|(key, values)| (key.to_string(), serde_json::json!(values)))
            .collect();
        serde_json::json!({
            "status": self.status_code.unwrap_or(200),
            "outcome": self.outcome.as_str(),
            "finished": self.finished,
            "artifact": self.matched_artifact,
            "path": self.path,
            "query": self.query.to_query_string(),
            "publicPath": self.public_path,
            "headers": headers,
            "fault": self.fault,
        })
    }
}
