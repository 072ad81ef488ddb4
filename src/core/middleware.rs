//! The middleware invocation protocol.
//!
//! The worker sees the current path and query, every request header plus
//! [`INVOKE_HEADER`], and a replay of the buffered body. Its answer is read
//! through a small set of control headers, in this order of precedence:
//!
//! 1. [`OVERRIDE_HEADERS`] replaces the named request headers with the
//!    values of the matching `x-middleware-request-<name>` headers.
//! 2. [`REWRITE_HEADER`] re-enters the table at the filesystem boundary.
//! 3. `location` turns the response into a redirect.
//! 4. [`REFRESH_HEADER`] forces a complete response.
//! 5. [`NEXT_HEADER`] continues the walk.
//! 6. Anything else is a complete response.
//!
//! Non-control headers are merged into the response headers in every case.
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::Instrument;

use super::{
    context::ResolutionContext,
    query::Query,
    resolver::{EntryOutcome, ResolveError},
    result::ResolutionResult,
    route_table::{Phase, TableSettings},
};
use crate::{
    metrics::{self, MiddlewareTimer},
    ports::middleware_worker::{MiddlewareRequest, MiddlewareResponse, MiddlewareWorker},
    tracing_setup::create_middleware_span,
    utils::url::{is_absolute_url, relativize, split_path_query},
};

pub const INVOKE_HEADER: &str = "x-middleware-invoke";
pub const OVERRIDE_HEADERS: &str = "x-middleware-override-headers";
pub const REQUEST_HEADER_PREFIX: &str = "x-middleware-request-";
pub const REWRITE_HEADER: &str = "x-middleware-rewrite";
pub const NEXT_HEADER: &str = "x-middleware-next";
pub const REFRESH_HEADER: &str = "x-middleware-refresh";

const CONTROL_PREFIX: &str = "x-middleware-";

/// Headers from the worker that never reach the client.
pub fn is_control_header(name: &HeaderName) -> bool {
    name == header::CONTENT_LENGTH
        || name == header::TRANSFER_ENCODING
        || name.as_str().starts_with(CONTROL_PREFIX)
}

/// Build the outbound request for the current state of `ctx`.
pub fn build_request(ctx: &ResolutionContext) -> MiddlewareRequest {
    let mut url = format!("{}{}", ctx.origin, ctx.path);
    let public = ctx.query.without_reserved();
    if !public.is_empty() {
        url.push('?');
        url.push_str(&public.to_query_string());
    }

    let mut headers = ctx.request_headers.clone();
    headers.insert(INVOKE_HEADER, HeaderValue::from_static("1"));

    MiddlewareRequest {
        method: ctx.method.clone(),
        url,
        headers,
        body: ctx.body.replay(),
    }
}

/// Run the worker for `ctx` and interpret its answer.
pub async fn invoke(
    ctx: &mut ResolutionContext,
    settings: &TableSettings,
    worker: &dyn MiddlewareWorker,
    timeout: Duration,
) -> Result<EntryOutcome, ResolveError> {
    let request = build_request(ctx);
    let span = create_middleware_span(&request.url);
    let cancellation = ctx.cancellation.clone();

    let exchange = async {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ResolveError::Cancelled),
            ready = tokio::time::timeout(timeout, worker.ensure_ready()) => match ready {
                Ok(ready) => ready?,
                Err(_) => return Err(ResolveError::MiddlewareTimeout(timeout)),
            },
        }

        let _timer = MiddlewareTimer::new();
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ResolveError::Cancelled),
            response = tokio::time::timeout(timeout, worker.invoke(request)) => match response {
                Ok(response) => response.map_err(ResolveError::from),
                Err(_) => Err(ResolveError::MiddlewareTimeout(timeout)),
            },
        }
    };

    let response = match exchange.instrument(span.clone()).await {
        Ok(response) => response,
        Err(e) => {
            metrics::increment_middleware_invocations(match &e {
                ResolveError::Cancelled => "cancelled",
                ResolveError::MiddlewareTimeout(_) => "timeout",
                _ => "error",
            });
            return Err(e);
        }
    };
    metrics::increment_middleware_invocations("ok");
    span.record("http.status_code", response.status.as_u16());

    interpret_response(ctx, settings, response)
}

/// Apply a worker response to `ctx`.
pub fn interpret_response(
    ctx: &mut ResolutionContext,
    settings: &TableSettings,
    response: MiddlewareResponse,
) -> Result<EntryOutcome, ResolveError> {
    let MiddlewareResponse {
        status,
        headers,
        body,
    } = response;

    if let Some(names) = header_str(&headers, OVERRIDE_HEADERS) {
        let overridden = override_request_headers(&ctx.request_headers, &headers, names);
        ctx.replace_request_headers(overridden);
    }

    // The worker's values replace earlier ones for the same key, but a key
    // the worker repeats keeps every value.
    for name in headers.keys() {
        if is_control_header(name) {
            continue;
        }
        let mut first = true;
        for value in headers.get_all(name) {
            let Ok(value) = value.to_str() else {
                tracing::warn!(header = %name, "Dropping non-ASCII middleware header");
                continue;
            };
            if first {
                ctx.response_headers.set(name.as_str(), value);
                first = false;
            } else {
                ctx.response_headers.append(name.as_str(), value);
            }
        }
    }

    if let Some(rewrite) = header_str(&headers, REWRITE_HEADER) {
        let target = resolve_url(rewrite, &ctx.initial_url)?;
        if is_absolute_url(&target) {
            tracing::debug!(url = %target, "Middleware rewrote to an external URL");
            return Ok(EntryOutcome::Terminate(Box::new(ResolutionResult::external(
                ctx, target,
            ))));
        }

        let target = target.split('#').next().unwrap_or_default();
        let (path, raw_query) = split_path_query(target);
        let mut query = Query::parse(raw_query).without_reserved();
        query.merge_missing(&ctx.query.reserved());

        tracing::debug!(path = %path, "Middleware rewrote the request");
        ctx.path = if path.is_empty() { "/" } else { path }.to_string();
        ctx.query = query;
        ctx.rewritten = true;
        ctx.localize_path(settings);
        return Ok(EntryOutcome::Reenter(Phase::Filesystem));
    }

    if let Some(location) = header_str(&headers, header::LOCATION.as_str()) {
        let target = resolve_url(location, &ctx.initial_url)?;
        return Ok(EntryOutcome::Terminate(Box::new(ResolutionResult::redirect(
            ctx,
            status.as_u16(),
            &target,
        ))));
    }

    if headers.contains_key(NEXT_HEADER) && !headers.contains_key(REFRESH_HEADER) {
        return Ok(EntryOutcome::Continue);
    }

    Ok(EntryOutcome::Terminate(Box::new(
        ResolutionResult::middleware_response(ctx, status.as_u16(), body),
    )))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn resolve_url(value: &str, base: &str) -> Result<String, ResolveError> {
    relativize(value, base).map_err(|source| ResolveError::InvalidMiddlewareUrl {
        url: value.to_string(),
        source,
    })
}

/// Headers not listed in `names` are kept as they are.
fn override_request_headers(current: &HeaderMap, response: &HeaderMap, names: &str) -> HeaderMap {
    let mut overridden = current.clone();
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let lower = name.to_ascii_lowercase();
        let Ok(header_name) = HeaderName::from_bytes(lower.as_bytes()) else {
            tracing::warn!(header = %name, "Ignoring invalid override header name");
            continue;
        };
        overridden.remove(&header_name);
        let carrier = format!("{REQUEST_HEADER_PREFIX}{lower}");
        for value in response.get_all(carrier.as_str()) {
            overridden.append(header_name.clone(), value.clone());
        }
    }
    overridden
}
