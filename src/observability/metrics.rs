//! Metrics collection and exposition.
//!
//! # Metrics
//! - `engine_requests_total` (counter): requests by application, method, status
//! - `engine_request_duration_seconds` (histogram): front-door latency
//! - `engine_active_connections` (gauge): current connection count
//! - `engine_dispatches_total` (counter): chain runs by dispatch type
//! - `engine_sessions_total` (counter): session events (created, destroyed, ...)
//! - `engine_active_sessions` (gauge): live sessions per application
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so unit tests need no setup
//! - Status is recorded as a label string, not a histogram dimension

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::webapp::request::DispatchType;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(application: &str, method: &str, status: u16, duration: Duration) {
    metrics::counter!(
        "engine_requests_total",
        "application" => application.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "engine_request_duration_seconds",
        "application" => application.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_dispatch(dispatch: DispatchType) {
    metrics::counter!("engine_dispatches_total", "type" => dispatch.as_str()).increment(1);
}

pub fn record_session_event(event: &'static str) {
    metrics::counter!("engine_sessions_total", "event" => event).increment(1);
}

pub fn set_active_sessions(context_path: &str, count: usize) {
    metrics::gauge!("engine_active_sessions", "context_path" => context_path.to_string())
        .set(count as f64);
}

pub fn set_active_connections(count: usize) {
    metrics::gauge!("engine_active_connections").set(count as f64);
}
