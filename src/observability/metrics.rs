//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, backend failures, PROXY headers)
//! - Expose a Prometheus-compatible scrape endpoint when configured
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_backend_unavailable_total` (counter): synthetic 503 responses
//! - `proxy_backend_errors_total` (counter): non-network backend failures
//! - `proxy_header_total` (counter): PROXY header outcomes per connection
//! - `proxy_backend_overrides_total` (counter): `_url` override attempts
//! - `proxy_rewrite_aborted_total` (counter): responses cut short while rewriting
//!
//! Without an installed recorder every macro below is a no-op, so call sites
//! never check whether metrics are enabled.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// The backend could not be reached and a 503 page was served instead.
pub fn record_backend_unavailable() {
    counter!("proxy_backend_unavailable_total").increment(1);
}

/// The backend exchange failed for a reason other than the network.
pub fn record_backend_error() {
    counter!("proxy_backend_errors_total").increment(1);
}

/// Outcome of PROXY header processing for one connection:
/// `decoded`, `absent` or `rejected`.
pub fn record_proxy_header(outcome: &'static str) {
    counter!("proxy_header_total", "outcome" => outcome).increment(1);
}

/// Outcome of a `_url` override attempt: `applied` or `invalid`.
pub fn record_backend_override(outcome: &'static str) {
    counter!("proxy_backend_overrides_total", "outcome" => outcome).increment(1);
}

pub fn record_rewrite_aborted() {
    counter!("proxy_rewrite_aborted_total").increment(1);
}
