//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_requests_total` (counter): requests by method, status
//! - `edge_request_duration_seconds` (histogram): latency distribution
//! - `edge_csrf_rejections_total` (counter): CSRF rejections by code
//! - `edge_csrf_tokens_issued_total` (counter): fresh tokens set as cookies
//! - `edge_rate_limited_total` (counter): 429s by policy
//! - `edge_rate_limit_entries` (gauge): live counter-store size after a sweep

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!("edge_requests_total", "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!("edge_request_duration_seconds", "method" => method.to_string(), "status" => status)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_csrf_rejection(code: &'static str) {
    counter!("edge_csrf_rejections_total", "code" => code).increment(1);
}

pub fn record_token_issued() {
    counter!("edge_csrf_tokens_issued_total").increment(1);
}

pub fn record_rate_limited(policy: &str) {
    counter!("edge_rate_limited_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_rate_limit_entries(len: usize) {
    gauge!("edge_rate_limit_entries").set(len as f64);
}
