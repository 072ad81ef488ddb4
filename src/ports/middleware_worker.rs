use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

/// Request relayed to the middleware worker.
#[derive(Debug)]
pub struct MiddlewareRequest {
    pub method: Method,
    /// Absolute URL of the current (possibly rewritten) path and query.
    pub url: String,
    pub headers: HeaderMap,
    pub body: AxumBody,
}

/// Response returned by the middleware worker.
#[derive(Debug)]
pub struct MiddlewareResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: AxumBody,
}

/// Error type for middleware worker operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MiddlewareError {
    /// The worker could not be started or never became ready
    #[error("Middleware worker not ready: {0}")]
    NotReady(String),

    /// The invocation failed in transit
    #[error("Middleware invocation failed: {0}")]
    Invocation(String),

    /// The worker answered with something that is not a middleware response
    #[error("Invalid middleware response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for middleware worker operations
pub type MiddlewareResult<T> = Result<T, MiddlewareError>;

/// MiddlewareWorker runs user middleware, usually out of process.
#[async_trait]
pub trait MiddlewareWorker: Send + Sync + 'static {
    /// Start the worker if needed. Called before every invocation; must be
    /// cheap once the worker is ready.
    async fn ensure_ready(&self) -> MiddlewareResult<()>;

    /// Run middleware for one request.
    async fn invoke(&self, request: MiddlewareRequest) -> MiddlewareResult<MiddlewareResponse>;
}
