use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with an explicit level. `RUST_LOG` wins when set.
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let result = if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
    };
    result.wrap_err("A global tracing subscriber is already installed")?;

    tracing::debug!(level, json_format, "Logging initialized");
    Ok(())
}

/// Span covering one resolution. `outcome`, `status` and `path.resolved` are
/// recorded when it completes.
pub fn create_resolution_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "resolve",
        http.method = method,
        http.path = path,
        request.id = request_id,
        outcome = tracing::field::Empty,
        status = tracing::field::Empty,
        path.resolved = tracing::field::Empty,
    )
}

/// Span covering one middleware round trip.
pub fn create_middleware_span(url: &str) -> tracing::Span {
    tracing::info_span!(
        "middleware",
        url = url,
        http.status_code = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_resolution_span() {
        let span = create_resolution_span("GET", "/api/test", "req-123");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "resolve");
        }
    }

    #[test]
    fn test_second_init_reports_an_error() {
        let _ = init_tracing_with_config("debug", true, true);
        assert!(init_tracing_with_config("debug", false, false).is_err());
    }
}
