use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use http::{HeaderValue, Request};
use tokio::sync::OnceCell;
use url::Url;

use crate::{
    config::models::MiddlewareWorkerConfig,
    ports::{
        http_client::HttpClient,
        middleware_worker::{
            MiddlewareError, MiddlewareRequest, MiddlewareResponse, MiddlewareResult,
            MiddlewareWorker,
        },
    },
};

const PROBE_ATTEMPTS: u32 = 20;
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Middleware worker reached over HTTP.
///
/// The worker is probed at its ready path before the first invocation;
/// concurrent callers share that single probe. Each caller waits at most the
/// middleware timeout for it; a caller that gives up leaves the next caller
/// to start probing again.
pub struct HttpMiddlewareWorker {
    endpoint: Url,
    ready_url: String,
    client: Arc<dyn HttpClient>,
    ready: OnceCell<()>,
}

impl HttpMiddlewareWorker {
    pub fn new(config: &MiddlewareWorkerConfig, client: Arc<dyn HttpClient>) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .wrap_err_with(|| format!("Invalid middleware endpoint: {}", config.endpoint))?;
        let ready_url = endpoint
            .join(&config.ready_path)
            .wrap_err_with(|| format!("Invalid ready path: {}", config.ready_path))?
            .to_string();
        Ok(Self {
            endpoint,
            ready_url,
            client,
            ready: OnceCell::new(),
        })
    }

    /// Per-invocation timeout from the configuration.
    pub fn timeout(config: &MiddlewareWorkerConfig) -> Result<Duration> {
        humantime::parse_duration(&config.timeout)
            .wrap_err_with(|| format!("Invalid middleware timeout: {}", config.timeout))
    }

    /// The worker URL for a request URL: the worker's origin with the
    /// request's path and query.
    fn worker_url(&self, request_url: &str) -> MiddlewareResult<(String, Url)> {
        let original = Url::parse(request_url)
            .map_err(|e| MiddlewareError::Invocation(format!("invalid request URL: {e}")))?;
        let mut target = self.endpoint.clone();
        target.set_path(original.path());
        target.set_query(original.query());
        Ok((target.to_string(), original))
    }

    async fn probe_until_ready(&self) -> MiddlewareResult<()> {
        for attempt in 1..=PROBE_ATTEMPTS {
            match self.client.probe(&self.ready_url, PROBE_TIMEOUT).await {
                Ok(true) => {
                    tracing::info!(url = %self.ready_url, attempt, "Middleware worker is ready");
                    return Ok(());
                }
                Ok(false) => {
                    tracing::debug!(url = %self.ready_url, attempt, "Middleware worker not ready yet")
                }
                Err(e) => {
                    tracing::debug!(url = %self.ready_url, attempt, error = %e, "Readiness probe failed")
                }
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
        Err(MiddlewareError::NotReady(format!(
            "{} did not become ready after {PROBE_ATTEMPTS} probes",
            self.ready_url
        )))
    }
}

#[async_trait]
impl MiddlewareWorker for HttpMiddlewareWorker {
    async fn ensure_ready(&self) -> MiddlewareResult<()> {
        self.ready
            .get_or_try_init(|| self.probe_until_ready())
            .await
            .map(|_| ())
    }

    async fn invoke(&self, request: MiddlewareRequest) -> MiddlewareResult<MiddlewareResponse> {
        let (target, original) = self.worker_url(&request.url)?;

        let mut outbound = Request::builder()
            .method(request.method)
            .uri(&target)
            .body(request.body)
            .map_err(|e| MiddlewareError::Invocation(e.to_string()))?;
        *outbound.headers_mut() = request.headers;

        // The worker sees its own authority in Host; keep the public one.
        let public_host = match (original.host_str(), original.port()) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            (Some(host), None) => Some(host.to_string()),
            _ => None,
        };
        if let Some(host) = public_host.and_then(|h| HeaderValue::from_str(&h).ok()) {
            outbound.headers_mut().insert("x-forwarded-host", host);
        }
        if let Ok(proto) = HeaderValue::from_str(original.scheme()) {
            outbound.headers_mut().insert("x-forwarded-proto", proto);
        }

        let response = self
            .client
            .send_request(outbound)
            .await
            .map_err(|e| MiddlewareError::Invocation(e.to_string()))?;
        let (parts, body) = response.into_parts();
        Ok(MiddlewareResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
