//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_connections_active` (gauge): live connections in the registry
//! - `gateway_connections_total` (counter): connections accepted
//! - `gateway_evictions_total` (counter): connections closed by the idle watchdog
//! - `gateway_handshake_failures_total` (counter): failed handshakes by reason
//! - `gateway_nodes_registered` (gauge): nodes currently registered

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(active: usize) {
    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_connections_active").set(active as f64);
}

pub fn record_connection_closed(active: usize) {
    gauge!("gateway_connections_active").set(active as f64);
}

pub fn record_eviction() {
    counter!("gateway_evictions_total").increment(1);
}

pub fn record_handshake_failure(reason: &'static str) {
    counter!("gateway_handshake_failures_total", "reason" => reason).increment(1);
}

pub fn record_nodes(registered: usize) {
    gauge!("gateway_nodes_registered").set(registered as f64);
}
