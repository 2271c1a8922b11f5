//! Upstream error taxonomy and circuit errors.

use std::time::Duration;
use thiserror::Error;

/// A failed call to the remote API, as seen by the resilience layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The API answered with a non-success status.
    #[error("upstream returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// Connection refused, reset, DNS failure and the like.
    #[error("network error: {0}")]
    Network(String),

    /// The call exceeded its deadline.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The request was rejected as malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were missing, invalid or insufficient.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl UpstreamError {
    /// Build an error from an HTTP status code, mapping well-known client
    /// codes onto their dedicated variants.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            400 | 422 => Self::Validation(message),
            401 | 403 => Self::Auth(message),
            404 => Self::NotFound(message),
            _ => Self::Status { code, message },
        }
    }

    /// Systemic backend trouble: 5xx, network-level errors and timeouts.
    ///
    /// This is the default circuit-breaking classification.
    pub fn is_server_side(&self) -> bool {
        match self {
            Self::Status { code, .. } => *code >= 500,
            Self::Network(_) | Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether the error means the credential itself was refused.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Errors returned from [`CircuitBreaker::exec`](super::CircuitBreaker::exec).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitError {
    /// The circuit rejected the call without attempting it.
    #[error("circuit '{name}' is open")]
    Open { name: String },

    /// The call (or its fallback) failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl CircuitError {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Result type for circuit-guarded calls.
pub type CircuitResult<T> = Result<T, CircuitError>;
