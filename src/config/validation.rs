//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, timeouts > 0)
//! - Check cross-field constraints (backoff bounds, refresh margin)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: &ShieldConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ShieldConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("tokens.initial_backoff_ms ({initial}) exceeds tokens.max_backoff_ms ({max})")]
    BackoffBounds { initial: u64, max: u64 },

    #[error("tokens.refresh_margin_ms ({margin}) must be below tokens.default_validity_ms ({validity})")]
    RefreshMargin { margin: u64, validity: u64 },

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive: [(&'static str, u64); 13] = [
        ("cache.ttl_ms", config.cache.ttl_ms),
        ("cache.max_items", config.cache.max_items as u64),
        ("circuit.failure_threshold", config.circuit.failure_threshold as u64),
        ("circuit.success_threshold", config.circuit.success_threshold as u64),
        ("circuit.reset_timeout_ms", config.circuit.reset_timeout_ms),
        ("circuit.request_timeout_ms", config.circuit.request_timeout_ms),
        ("circuit.initial_request_timeout_ms", config.circuit.initial_request_timeout_ms),
        ("circuit.half_open_max_probes", config.circuit.half_open_max_probes as u64),
        ("batch.max_batch_size", config.batch.max_batch_size as u64),
        ("batch.cache_ttl_ms", config.batch.cache_ttl_ms),
        ("tokens.max_refresh_attempts", config.tokens.max_refresh_attempts as u64),
        ("tokens.default_validity_ms", config.tokens.default_validity_ms),
        ("tokens.request_timeout_ms", config.tokens.request_timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::MustBePositive { field });
        }
    }

    let tokens = &config.tokens;
    if tokens.initial_backoff_ms > tokens.max_backoff_ms {
        errors.push(ValidationError::BackoffBounds {
            initial: tokens.initial_backoff_ms,
            max: tokens.max_backoff_ms,
        });
    }
    if tokens.default_validity_ms > 0 && tokens.refresh_margin_ms >= tokens.default_validity_ms {
        errors.push(ValidationError::RefreshMargin {
            margin: tokens.refresh_margin_ms,
            validity: tokens.default_validity_ms,
        });
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
