//! Token types, the issuer seam and refresh events.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::resilience::UpstreamError;

/// What the issuer hands back for one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    pub join_link: String,
}

/// The credential and parameters a session regenerates its token from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub credential: String,
    /// Falls back to `tokens.default_validity_ms` when unset.
    pub validity: Option<Duration>,
}

impl TokenRequest {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            validity: None,
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = Some(validity);
        self
    }
}

/// Remote service that mints short-lived tokens.
pub trait TokenIssuer: Send + Sync {
    fn issue<'a>(
        &'a self,
        request: &'a TokenRequest,
        validity: Duration,
    ) -> BoxFuture<'a, Result<IssuedToken, UpstreamError>>;
}

/// A token held for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub join_link: String,
    pub session_id: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The issuer failed while generating on demand.
    #[error("token issuer failed: {0}")]
    Issuer(UpstreamError),

    /// The issuer refused the stored credential during refresh.
    #[error("credential rejected while refreshing session '{session_id}': {error}")]
    AuthRejected { session_id: String, error: UpstreamError },

    #[error("refresh for session '{session_id}' failed after {attempts} attempts: {last_error}")]
    RefreshExhausted {
        session_id: String,
        attempts: u32,
        last_error: UpstreamError,
    },

    #[error("unknown session '{0}'")]
    UnknownSession(String),
}

pub type TokenResult<T> = Result<T, TokenError>;

/// Refresh lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Generated { session_id: String, expires_in: Duration },

    Refreshed { session_id: String, attempts: u32 },

    /// An attempt failed and another follows after `delay`.
    RefreshRetrying {
        session_id: String,
        attempt: u32,
        delay: Duration,
        error: UpstreamError,
    },

    /// The retry chain ended without a new token.
    RefreshFailed { session_id: String, error: TokenError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub sessions: usize,
    pub expired: usize,
    pub refreshes_in_flight: usize,
    pub scheduled: usize,
}
