//! Named circuit breakers shared across callers.
//!
//! # Responsibilities
//! - Map each logical operation name to exactly one circuit
//! - Create circuits lazily on first use
//! - Reset state for test isolation
//!
//! The first registration of a name wins; later options are ignored.

use std::sync::Arc;

use dashmap::DashMap;

use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerOptions, CircuitSnapshot};

/// Table of circuits keyed by operation name.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    circuits: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the circuit for `name`, creating it with `options` if needed.
    pub fn get_or_create(&self, name: &str, options: CircuitBreakerOptions) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, || options)
    }

    /// Like [`CircuitRegistry::get_or_create`], building options only on creation.
    pub fn get_or_create_with<F>(&self, name: &str, options: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> CircuitBreakerOptions,
    {
        if let Some(existing) = self.circuits.get(name) {
            return existing.value().clone();
        }

        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| {
                let options = options();
                tracing::debug!(circuit = %name, options = ?options, "Registered circuit");
                Arc::new(CircuitBreaker::new(name, options))
            })
            .value()
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuits.get(name).map(|entry| entry.value().clone())
    }

    /// Reset one circuit to closed. Returns false if it is not registered.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(circuit) => {
                circuit.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every registered circuit to closed.
    pub fn reset_all(&self) {
        let circuits: Vec<Arc<CircuitBreaker>> =
            self.circuits.iter().map(|entry| entry.value().clone()).collect();
        for circuit in circuits {
            circuit.reset();
        }
    }

    /// Forget every registration so the next lookup recreates it.
    pub fn clear(&self) {
        self.circuits.clear();
    }

    /// Snapshots of every circuit, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> =
            self.circuits.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }
}
