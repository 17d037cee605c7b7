//! Metrics collection and exposition.
//!
//! # Metrics
//! - `xmppd_subsystem_steps_total` (counter): sequencer actions by step, phase, outcome
//! - `xmppd_modules_total` (counter): module starts/stops by host, module, outcome
//! - `xmppd_active_connections` (gauge): live client connections
//! - `xmppd_drain_signals_total` (counter): terminate signals sent while draining
//! - `xmppd_child_restarts_total` (counter): supervised child restarts by child
//! - `xmppd_peer_connects_total` (counter): cluster link attempts by outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_step(step: &str, phase: &'static str, outcome: &'static str) {
    counter!(
        "xmppd_subsystem_steps_total",
        "step" => step.to_string(),
        "phase" => phase,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_module(host: &str, module: &str, phase: &'static str, outcome: &'static str) {
    counter!(
        "xmppd_modules_total",
        "host" => host.to_string(),
        "module" => module.to_string(),
        "phase" => phase,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("xmppd_active_connections").set(count as f64);
}

pub fn record_drain_signals(count: usize) {
    counter!("xmppd_drain_signals_total").increment(count as u64);
}

pub fn record_child_restart(child: &str) {
    counter!("xmppd_child_restarts_total", "child" => child.to_string()).increment(1);
}

pub fn record_peer_connect(outcome: &'static str) {
    counter!("xmppd_peer_connects_total", "outcome" => outcome).increment(1);
}
