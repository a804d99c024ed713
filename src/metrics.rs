//! Prometheus metrics for the middleware stages.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so the stages can be used in libraries and tests without setup.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `deadline_resolved_total` - Deadlines installed or advertised (labels: stage, source)
//! - `deadline_clamped_total` - Deadlines shortened by `max_timeout` (labels: stage)
//! - `deadline_preserved_total` - Requests that already carried a deadline (server stage)
//! - `http_requests_total` - Requests seen by the access log (labels: route, method, status)
//!
//! ## Histograms
//! - `http_request_duration_seconds` - Request duration (labels: route, method, status)

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const DEADLINE_RESOLVED_TOTAL: &str = "deadline_resolved_total";
    pub const DEADLINE_CLAMPED_TOTAL: &str = "deadline_clamped_total";
    pub const DEADLINE_PRESERVED_TOTAL: &str = "deadline_preserved_total";
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
}

/// Stage labels.
pub mod stage {
    pub const SERVER: &str = "server";
    pub const CLIENT: &str = "client";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use,
/// or a recorder is already installed).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::DEADLINE_RESOLVED_TOTAL,
        "Total number of deadlines resolved, by stage and source"
    );
    describe_counter!(
        names::DEADLINE_CLAMPED_TOTAL,
        "Total number of deadlines shortened by the configured maximum"
    );
    describe_counter!(
        names::DEADLINE_PRESERVED_TOTAL,
        "Total number of inbound requests whose existing deadline was kept"
    );
    describe_counter!(
        names::HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests recorded by the access log"
    );
    describe_histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Deadline Stages
// =============================================================================

/// Record a resolved deadline.
pub fn record_deadline_resolved(stage: &'static str, source: &'static str, clamped: bool) {
    counter!(names::DEADLINE_RESOLVED_TOTAL, "stage" => stage, "source" => source).increment(1);
    if clamped {
        counter!(names::DEADLINE_CLAMPED_TOTAL, "stage" => stage).increment(1);
    }
}

/// Record an inbound request whose context already had a deadline.
pub fn record_deadline_preserved() {
    counter!(names::DEADLINE_PRESERVED_TOTAL).increment(1);
}

// =============================================================================
// Access Log
// =============================================================================

/// Record a completed HTTP request.
pub fn record_request(route: &str, method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::HTTP_REQUESTS_TOTAL, "route" => route.to_string(), "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, "route" => route.to_string(), "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed recorder must not panic.

    #[test]
    fn test_record_deadline_resolved() {
        record_deadline_resolved(stage::SERVER, "header", false);
        record_deadline_resolved(stage::CLIENT, "context", true);
    }

    #[test]
    fn test_record_deadline_preserved() {
        record_deadline_preserved();
    }

    #[test]
    fn test_record_request() {
        record_request("/users/{id}", "GET", 200, 0.012);
    }
}
