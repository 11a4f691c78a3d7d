//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_connections_total` (counter): accepted client connections
//! - `tunnel_active` (gauge): connections currently being served
//! - `tunnel_outcomes_total` (counter): how each connection ended, by `outcome`
//! - `tunnel_bytes_total` (counter): relayed bytes, by `direction` (up/down)
//! - `tunnel_duration_seconds` (histogram): lifetime of established tunnels
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::tunnel::relay::TunnelSummary;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn connection_opened() {
    counter!("tunnel_connections_total").increment(1);
    gauge!("tunnel_active").increment(1.0);
}

pub fn connection_closed(outcome: &'static str) {
    gauge!("tunnel_active").decrement(1.0);
    counter!("tunnel_outcomes_total", "outcome" => outcome).increment(1);
}

pub fn record_tunnel(summary: &TunnelSummary) {
    counter!("tunnel_bytes_total", "direction" => "up").increment(summary.bytes_up);
    counter!("tunnel_bytes_total", "direction" => "down").increment(summary.bytes_down);
    histogram!("tunnel_duration_seconds").record(summary.duration.as_secs_f64());
}
