use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

const USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// HTTP client adapter using Hyper with Rustls.
///
/// Used to proxy external rewrites and to talk to an out-of-process
/// middleware worker. No retries happen here.
#[derive(Clone)]
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);
        Ok(Self { client })
    }

    fn set_default_headers(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let host = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host = HeaderValue::from_str(&host)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let headers = req.headers_mut();
        headers.insert(header::HOST, host);
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        }
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::set_default_headers(&mut req)?;

        let span = tracing::info_span!(
            "upstream_request",
            http.method = %req.method(),
            http.url = %req.uri(),
            http.status_code = tracing::field::Empty,
        );

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        let result = self
            .client
            .request(Request::from_parts(parts, body))
            .instrument(span.clone())
            .await;
        match result {
            Ok(response) => {
                span.record("http.status_code", response.status().as_u16());
                let (mut parts, body) = response.into_parts();
                // The body is re-framed by the server on the way out.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(body)))
            }
            Err(e) => {
                span.record("http.status_code", 599u16);
                tracing::warn!(parent: &span, error = %e, "Upstream request {} {} failed", method, uri);
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
        }
    }

    async fn probe(&self, url: &str, limit: Duration) -> HttpClientResult<bool> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .header(header::USER_AGENT, USER_AGENT)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        match timeout(limit, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let ready = response.status().is_success();
                let _ = response.into_body().collect().await;
                tracing::debug!(url, ready, "Probe finished");
                Ok(ready)
            }
            Ok(Err(e)) => {
                tracing::debug!(url, error = %e, "Probe could not connect");
                Ok(false)
            }
            Err(_) => Err(HttpClientError::Timeout(limit)),
        }
    }
}
