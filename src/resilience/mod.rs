//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call for logical operation "rooms.list":
//!     → registry.rs (resolve or lazily create the circuit for that name)
//!     → circuit_breaker.rs (admit? closed / half-open probe / rejected)
//!     → timeouts.rs (enforce request or first-call deadline)
//!     → outcome classified by the circuit's `is_failure`
//!         - circuit-breaking (5xx, network, timeout) → failure counters
//!         - client errors (validation, not found, auth) → passed through
//!     → fallback on rejection or classified failure, if configured
//!
//! Background retries (token refresh):
//!     → backoff.rs (exponential delay, capped)
//! ```
//!
//! # Design Decisions
//! - One circuit per operation name, shared by every caller for the process lifetime
//! - Fail fast while open; no waiting on the timeout
//! - Half-open admits a bounded number of probes
//! - Registry is an injected value, not a global

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod timeouts;
pub mod types;

pub use backoff::calculate_backoff;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerOptions, CircuitSnapshot, CircuitState, FailureClassifier, Fallback,
};
pub use registry::CircuitRegistry;
pub use timeouts::with_deadline;
pub use types::{CircuitError, CircuitResult, UpstreamError};
