//! Shared utilities for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backend_shield::resilience::UpstreamError;
use backend_shield::tokens::{IssuedToken, TokenIssuer, TokenRequest};
use backend_shield::{Shield, ShieldConfig};
use futures_util::future::BoxFuture;

/// Token issuer that counts calls and can be switched into a failing mode.
#[derive(Default)]
pub struct FakeIssuer {
    calls: AtomicUsize,
    failure: Mutex<Option<UpstreamError>>,
}

#[allow(dead_code)]
impl FakeIssuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every following call fail with `error`.
    pub fn fail_with(&self, error: UpstreamError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

impl TokenIssuer for FakeIssuer {
    fn issue<'a>(&'a self, request: &'a TokenRequest, _validity: Duration) -> BoxFuture<'a, Result<IssuedToken, UpstreamError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(IssuedToken {
                value: format!("{}-{n}", request.credential),
                join_link: format!("https://meet.example/join/{n}"),
            })
        })
    }
}

/// Config with short timers so tests stay fast.
#[allow(dead_code)]
pub fn test_config() -> ShieldConfig {
    let mut config = ShieldConfig::default();
    config.circuit.failure_threshold = 1;
    config.circuit.reset_timeout_ms = 100;
    config.batch.batch_delay_ms = 10;
    config.batch.memory_check_interval_ms = 0;
    config.tokens.refresh_margin_ms = 5_000;
    config.tokens.initial_backoff_ms = 100;
    config.tokens.max_backoff_ms = 150;
    config
}

/// A shield with [`test_config`] and a fresh [`FakeIssuer`].
#[allow(dead_code)]
pub fn test_shield() -> (Shield, Arc<FakeIssuer>) {
    let issuer = FakeIssuer::new();
    (Shield::new(test_config(), issuer.clone()), issuer)
}
