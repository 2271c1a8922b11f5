//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shield_circuit_state` (gauge): 0=closed, 1=half-open, 2=open, by circuit
//! - `shield_circuit_rejections_total` (counter): calls short-circuited while open
//! - `shield_circuit_calls_total` (counter): executed calls by circuit, outcome
//! - `shield_cache_hits_total` / `shield_cache_misses_total` (counters)
//! - `shield_cache_entries` (gauge): live entries in the shared cache
//! - `shield_batch_dispatches_total` (counter): executor invocations by batch, outcome
//! - `shield_batch_size` (histogram): unique keys per dispatch
//! - `shield_token_refresh_total` (counter): refresh attempts by outcome
//! - `shield_memory_pressure_total` (counter): cache purges due to memory
//!
//! # Design Decisions
//! - Helpers take plain values so call sites stay one line
//! - Nothing here allocates unless a recorder is installed

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_circuit_state(circuit: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("shield_circuit_state", "circuit" => circuit.to_string()).set(value);
}

pub fn record_circuit_rejection(circuit: &str) {
    counter!("shield_circuit_rejections_total", "circuit" => circuit.to_string()).increment(1);
}

pub fn record_circuit_call(circuit: &str, outcome: &'static str) {
    counter!(
        "shield_circuit_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("shield_cache_hits_total").increment(1);
    } else {
        counter!("shield_cache_misses_total").increment(1);
    }
}

pub fn record_cache_size(entries: usize) {
    gauge!("shield_cache_entries").set(entries as f64);
}

pub fn record_batch_dispatch(batch_id: &str, unique_keys: usize, outcome: &'static str) {
    counter!(
        "shield_batch_dispatches_total",
        "batch" => batch_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("shield_batch_size", "batch" => batch_id.to_string()).record(unique_keys as f64);
}

pub fn record_token_refresh(outcome: &'static str) {
    counter!("shield_token_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_memory_pressure() {
    counter!("shield_memory_pressure_total").increment(1);
}
