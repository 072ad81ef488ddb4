//! Metrics helpers for switchyard.
//!
//! Thin wrappers around the `metrics` crate macros. No exporter is bundled;
//! the embedding application installs whatever recorder it wants. Without a
//! recorder every call here is a no-op.
//!
//! Provided metrics:
//! * `switchyard_resolutions_total` (counter, label `outcome`)
//! * `switchyard_resolution_duration_seconds` (histogram, label `outcome`)
//! * `switchyard_middleware_invocations_total` (counter, label `result`)
//! * `switchyard_middleware_duration_seconds` (histogram)
//! * `switchyard_table_reloads_total` (counter, label `result`)
//! * `switchyard_route_table_entries` (gauge)
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const SWITCHYARD_RESOLUTIONS_TOTAL: &str = "switchyard_resolutions_total";
pub const SWITCHYARD_RESOLUTION_DURATION_SECONDS: &str = "switchyard_resolution_duration_seconds";
pub const SWITCHYARD_MIDDLEWARE_INVOCATIONS_TOTAL: &str = "switchyard_middleware_invocations_total";
pub const SWITCHYARD_MIDDLEWARE_DURATION_SECONDS: &str = "switchyard_middleware_duration_seconds";
pub const SWITCHYARD_TABLE_RELOADS_TOTAL: &str = "switchyard_table_reloads_total";
pub const SWITCHYARD_ROUTE_TABLE_ENTRIES: &str = "switchyard_route_table_entries";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        SWITCHYARD_RESOLUTIONS_TOTAL,
        Unit::Count,
        "Resolutions completed, by outcome."
    );
    describe_histogram!(
        SWITCHYARD_RESOLUTION_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent resolving a request, middleware included."
    );
    describe_counter!(
        SWITCHYARD_MIDDLEWARE_INVOCATIONS_TOTAL,
        Unit::Count,
        "Middleware worker invocations, by result."
    );
    describe_histogram!(
        SWITCHYARD_MIDDLEWARE_DURATION_SECONDS,
        Unit::Seconds,
        "Round trip time of middleware worker invocations."
    );
    describe_counter!(
        SWITCHYARD_TABLE_RELOADS_TOTAL,
        Unit::Count,
        "Route table reload attempts, by result."
    );
    describe_gauge!(
        SWITCHYARD_ROUTE_TABLE_ENTRIES,
        "Number of entries in the active route table."
    );
});

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Metric descriptions registered");
    Ok(())
}

pub fn increment_resolutions(outcome: &'static str) {
    counter!(SWITCHYARD_RESOLUTIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_resolution_duration(outcome: &'static str, duration: Duration) {
    histogram!(SWITCHYARD_RESOLUTION_DURATION_SECONDS, "outcome" => outcome)
        .record(duration.as_secs_f64());
}

pub fn increment_middleware_invocations(result: &'static str) {
    counter!(SWITCHYARD_MIDDLEWARE_INVOCATIONS_TOTAL, "result" => result).increment(1);
}

pub fn record_middleware_duration(duration: Duration) {
    histogram!(SWITCHYARD_MIDDLEWARE_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Record a table reload attempt and, on success, the new table size.
pub fn record_table_reload(success: bool, entries: usize) {
    let result = if success { "success" } else { "failure" };
    counter!(SWITCHYARD_TABLE_RELOADS_TOTAL, "result" => result).increment(1);
    if success {
        gauge!(SWITCHYARD_ROUTE_TABLE_ENTRIES).set(entries as f64);
    }
}

/// RAII helper measuring a middleware round trip.
pub struct MiddlewareTimer {
    start: Instant,
}

impl MiddlewareTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MiddlewareTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MiddlewareTimer {
    fn drop(&mut self) {
        record_middleware_duration(self.start.elapsed());
    }
}
