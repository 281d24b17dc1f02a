//! Prometheus metrics for application observability.
//!
//! Metrics are exposed on a dedicated HTTP listener (`METRICS_PORT`, default
//! 9090). Recording functions are no-ops until [`init_metrics`] installs the
//! exporter, so tests and tools can call them freely.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `tokenscan_http_requests_total` - Requests served (labels: route, method, status)
//! - `tokenscan_rate_limited_total` - Requests rejected with 429 (label: scope)
//! - `tokenscan_validation_failures_total` - Bodies rejected by validation (label: route)
//! - `tokenscan_ssrf_rejections_total` - URLs rejected by the SSRF guard
//! - `tokenscan_idempotency_conflicts_total` - Replayed idempotency keys
//! - `tokenscan_upstream_requests_total` - Outbound calls (labels: upstream, outcome)
//!
//! ## Histograms
//! - `tokenscan_request_duration_seconds` - Request duration (labels: route, method, status)
//! - `tokenscan_upstream_duration_seconds` - Outbound call duration (label: upstream)
//!
//! ## Gauges
//! - `tokenscan_rate_limit_entries` - Live fixed-window limiter entries

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "tokenscan_http_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "tokenscan_rate_limited_total";
    pub const VALIDATION_FAILURES_TOTAL: &str = "tokenscan_validation_failures_total";
    pub const SSRF_REJECTIONS_TOTAL: &str = "tokenscan_ssrf_rejections_total";
    pub const IDEMPOTENCY_CONFLICTS_TOTAL: &str = "tokenscan_idempotency_conflicts_total";
    pub const UPSTREAM_REQUESTS_TOTAL: &str = "tokenscan_upstream_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "tokenscan_request_duration_seconds";
    pub const UPSTREAM_DURATION_SECONDS: &str = "tokenscan_upstream_duration_seconds";
    pub const RATE_LIMIT_ENTRIES: &str = "tokenscan_rate_limit_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// Installs the global recorder with an HTTP listener on `metrics_addr` and
/// describes every metric.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (for example when
/// the port is taken or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests served"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by a rate limiter"
    );
    describe_counter!(
        names::VALIDATION_FAILURES_TOTAL,
        "Total number of request bodies rejected by validation"
    );
    describe_counter!(
        names::SSRF_REJECTIONS_TOTAL,
        "Total number of URLs rejected by the SSRF guard"
    );
    describe_counter!(
        names::IDEMPOTENCY_CONFLICTS_TOTAL,
        "Total number of requests replaying a claimed idempotency key"
    );
    describe_counter!(
        names::UPSTREAM_REQUESTS_TOTAL,
        "Total number of outbound calls to Bags, Helius and Jupiter"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Upstream call duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_ENTRIES,
        "Number of live entries in the fixed-window rate limiter"
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
// Counter Recording Functions
// =============================================================================

/// Record a served HTTP request.
pub fn record_http_request(route: &str, method: &str, status: u16) {
    counter!(names::HTTP_REQUESTS_TOTAL, "route" => route.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record a 429. `scope` is `ip`, `auth` or an upstream name.
pub fn record_rate_limited(scope: &str) {
    counter!(names::RATE_LIMITED_TOTAL, "scope" => scope.to_string()).increment(1);
}

pub fn record_validation_failure(route: &str) {
    counter!(names::VALIDATION_FAILURES_TOTAL, "route" => route.to_string()).increment(1);
}

pub fn record_ssrf_rejection() {
    counter!(names::SSRF_REJECTIONS_TOTAL).increment(1);
}

pub fn record_idempotency_conflict() {
    counter!(names::IDEMPOTENCY_CONFLICTS_TOTAL).increment(1);
}

/// Record an outbound call. `outcome` is `success`, `error`, `timeout` or
/// `rate_limited`.
pub fn record_upstream_request(upstream: &str, outcome: &str) {
    counter!(names::UPSTREAM_REQUESTS_TOTAL, "upstream" => upstream.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record HTTP request duration.
pub fn record_request_duration(route: &str, method: &str, status: u16, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "route" => route.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

pub fn record_upstream_duration(upstream: &str, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "upstream" => upstream.to_string())
        .record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the limiter size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_rate_limit_entries(entries: usize) {
    gauge!(names::RATE_LIMIT_ENTRIES).set(entries as f64);
}
