//! Metrics collection and exposition.
//!
//! # Metrics
//! - `agent_port_sessions_accepted_total` (counter): connections accepted
//! - `agent_port_sessions_dropped_total` (counter): sessions lost to queue overflow
//! - `agent_port_sessions_rejected_total` (counter): peers refused by the allow-list
//! - `agent_port_replies_total` (counter): replies by `outcome` (ok, error)
//! - `agent_port_bytes_sent_total` (counter): payload bytes written to peers
//! - `agent_port_accept_errors_total` (counter): failed accepts
//! - `agent_port_queue_depth` (gauge): sessions waiting for the worker
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted() {
    counter!("agent_port_sessions_accepted_total").increment(1);
}

pub fn record_dropped() {
    counter!("agent_port_sessions_dropped_total").increment(1);
}

pub fn record_rejected() {
    counter!("agent_port_sessions_rejected_total").increment(1);
}

pub fn record_reply(outcome: &'static str) {
    counter!("agent_port_replies_total", "outcome" => outcome).increment(1);
}

pub fn record_bytes_sent(bytes: usize) {
    counter!("agent_port_bytes_sent_total").increment(bytes as u64);
}

pub fn record_accept_error() {
    counter!("agent_port_accept_errors_total").increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("agent_port_queue_depth").set(depth as f64);
}
