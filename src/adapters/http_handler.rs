use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, StatusCode, header},
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::FileSystemArtifactStore,
    core::{
        Outcome, ResolutionResult, Resolver,
        request::{ConnectionInfo, InboundRequest, ReplayableBody},
    },
    ports::{
        artifact_store::ArtifactKind, dynamic_routes::DynamicRouteRegistry,
        http_client::HttpClient,
    },
};

/// HTTP front end: resolves every request and turns the result into a
/// response. Rendering pages is out of scope; rendered artifacts are
/// answered with a JSON description of what would be rendered.
#[derive(Clone)]
pub struct RoutingHandler {
    resolver: Arc<Resolver>,
    registry: Arc<dyn DynamicRouteRegistry>,
    artifacts: Arc<FileSystemArtifactStore>,
    http_client: Arc<dyn HttpClient>,
    max_body_bytes: usize,
    local_port: Option<u16>,
}

impl RoutingHandler {
    pub fn new(
        resolver: Arc<Resolver>,
        registry: Arc<dyn DynamicRouteRegistry>,
        artifacts: Arc<FileSystemArtifactStore>,
        http_client: Arc<dyn HttpClient>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            resolver,
            registry,
            artifacts,
            http_client,
            max_body_bytes,
            local_port: None,
        }
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Main request handler
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>> {
        let (parts, body) = req.into_parts();
        tracing::info!(
            method = %parts.method,
            uri = %parts.uri,
            client = ?client_addr,
            "Handling request"
        );

        let body = match ReplayableBody::buffer(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting request body");
                return Response::builder()
                    .status(StatusCode::PAYLOAD_TOO_LARGE)
                    .body(AxumBody::from("Request body too large"))
                    .wrap_err("Failed to build payload too large response");
            }
        };

        // Dropping this future (client went away) cancels the resolution.
        let cancellation = CancellationToken::new();
        let _guard = cancellation.clone().drop_guard();

        let mut inbound = InboundRequest::from_uri(parts.method.clone(), &parts.uri)
            .with_cancellation(cancellation);
        inbound.headers = parts.headers.clone();
        inbound.body = body.clone();
        inbound.connection = ConnectionInfo {
            encrypted: false,
            local_port: self.local_port,
        };

        let result = self.resolver.resolve(inbound, self.registry.as_ref()).await;
        if let Some(fault) = &result.fault {
            tracing::error!(fault = %fault, path = %result.public_path, "Resolution fault");
        }
        self.render(result, parts.method, body).await
    }

    async fn render(
        &self,
        mut result: ResolutionResult,
        method: http::Method,
        body: ReplayableBody,
    ) -> Result<Response<AxumBody>> {
        let headers = result.response_headers.to_header_map();
        let status = StatusCode::from_u16(result.status_code.unwrap_or(200))
            .wrap_err("Resolver produced an invalid status code")?;

        if result.outcome == Outcome::External {
            // Owned copies: the result holds a body that is not Sync.
            let url = result.path.clone();
            let request_headers = result.request_headers.clone();
            return self.proxy(url, request_headers, method, body, headers).await;
        }

        if result.is_redirect() {
            tracing::debug!(status = %status, location = ?result.location(), "Redirecting client");
        }
        if result.finished {
            let body = result.body.take().unwrap_or_else(AxumBody::empty);
            return respond(status, headers, body);
        }

        let static_path = result
            .matched_artifact
            .as_ref()
            .filter(|artifact| artifact.kind == ArtifactKind::StaticFile)
            .map(|artifact| artifact.path.clone());
        match static_path {
            Some(path) => {
                let mut request = Request::builder()
                    .method(method)
                    .body(AxumBody::empty())
                    .wrap_err("Failed to build static file request")?;
                *request.headers_mut() = result.request_headers.clone();
                let mut response = self.artifacts.serve(&path, request).await?;
                merge_headers(response.headers_mut(), headers);
                Ok(response)
            }
            None => {
                let description = result.describe();
                let mut headers = headers;
                headers.insert(
                    header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/json"),
                );
                respond(status, headers, AxumBody::from(description.to_string()))
            }
        }
    }

    /// Forward the request to the external rewrite target.
    async fn proxy(
        &self,
        url: String,
        request_headers: HeaderMap,
        method: http::Method,
        body: ReplayableBody,
        headers: HeaderMap,
    ) -> Result<Response<AxumBody>> {
        let mut request = Request::builder()
            .method(method)
            .uri(url.as_str())
            .body(body.replay())
            .wrap_err("Failed to build external rewrite request")?;
        *request.headers_mut() = request_headers;
        request.headers_mut().remove(header::HOST);

        match self.http_client.send_request(request).await {
            Ok(mut response) => {
                merge_headers(response.headers_mut(), headers);
                Ok(response)
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "External rewrite failed");
                Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .body(AxumBody::from("Upstream request failed"))
                    .wrap_err("Failed to build bad gateway response")
            }
        }
    }
}

fn respond(status: StatusCode, headers: HeaderMap, body: AxumBody) -> Result<Response<AxumBody>> {
    let mut response = Response::builder()
        .status(status)
        .body(body)
        .wrap_err("Failed to build response")?;
    *response.headers_mut() = headers;
    Ok(response)
}

fn merge_headers(target: &mut HeaderMap, extra: HeaderMap) {
    let mut current = None;
    for (name, value) in extra {
        if let Some(name) = name {
            target.remove(&name);
            current = Some(name);
        }
        if let Some(name) = &current {
            target.append(name.clone(), value);
        }
    }
}
