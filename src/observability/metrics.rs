//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define service metrics (requests, pool behaviour, sessions)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `request_service_requests_started_total` (counter): requests accepted
//! - `request_service_requests_total` (counter): requests by terminal outcome
//! - `request_service_request_failures_total` (counter): failures by error kind
//! - `request_service_connections_created_total` (counter): new transports by scheme
//! - `request_service_pool_reuse_total` (counter): idle connections handed out
//! - `request_service_pool_evictions_total` (counter): idle connections closed
//! - `request_service_pool_idle_connections` (gauge): idle set size
//! - `request_service_active_sessions` (gauge): connected client channels
//! - `request_service_malformed_frames_total` (counter): channels closed for bad input
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are small closed sets, never request data

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request_started() {
    ::metrics::counter!("request_service_requests_started_total").increment(1);
}

pub fn record_request_outcome(outcome: &'static str) {
    ::metrics::counter!("request_service_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_request_failure(kind: &'static str) {
    ::metrics::counter!("request_service_request_failures_total", "kind" => kind).increment(1);
}

pub fn record_connection_created(scheme: &'static str) {
    ::metrics::counter!("request_service_connections_created_total", "scheme" => scheme).increment(1);
}

pub fn record_pool_reuse() {
    ::metrics::counter!("request_service_pool_reuse_total").increment(1);
}

pub fn record_pool_evictions(count: usize) {
    ::metrics::counter!("request_service_pool_evictions_total").increment(count as u64);
}

pub fn record_idle_connections(count: usize) {
    ::metrics::gauge!("request_service_pool_idle_connections").set(count as f64);
}

pub fn record_active_sessions(count: usize) {
    ::metrics::gauge!("request_service_active_sessions").set(count as f64);
}

pub fn record_malformed_frame() {
    ::metrics::counter!("request_service_malformed_frames_total").increment(1);
}
