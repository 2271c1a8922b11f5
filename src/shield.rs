//! The shield context.
//!
//! One explicitly constructed value owns the shared cache, the circuit
//! registry, the batching engine and the token manager. Callers clone the
//! component handles they need; nothing is global.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::batching::BatchEngine;
use crate::cache::TtlCache;
use crate::config::ShieldConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerOptions, CircuitRegistry, CircuitResult, UpstreamError};
use crate::tokens::{TokenIssuer, TokenManager};

pub struct Shield {
    config: ShieldConfig,
    cache: Arc<TtlCache<Value>>,
    circuits: Arc<CircuitRegistry>,
    batches: Arc<BatchEngine>,
    tokens: TokenManager,
}

impl Shield {
    /// Build every component from `config`. Background tasks start only
    /// when called inside a Tokio runtime.
    pub fn new(config: ShieldConfig, issuer: Arc<dyn TokenIssuer>) -> Self {
        let cache = Arc::new(TtlCache::new(&config.cache));
        let batches = Arc::new(BatchEngine::new(&config.batch, cache.clone()));
        let tokens = TokenManager::new(&config.tokens, issuer);

        tracing::info!(
            cache_ttl_ms = config.cache.ttl_ms,
            max_items = config.cache.max_items,
            failure_threshold = config.circuit.failure_threshold,
            max_batch_size = config.batch.max_batch_size,
            "Shield initialised"
        );

        Self {
            config,
            cache,
            circuits: Arc::new(CircuitRegistry::new()),
            batches,
            tokens,
        }
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }

    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.circuits
    }

    pub fn batches(&self) -> &Arc<BatchEngine> {
        &self.batches
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// The circuit for `operation`, created with the configured defaults.
    pub fn circuit(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.circuits
            .get_or_create_with(operation, || CircuitBreakerOptions::from(&self.config.circuit))
    }

    /// Run `op(args)` through the circuit named `operation`.
    pub async fn call<F, Fut>(&self, operation: &str, args: Value, op: F) -> CircuitResult<Value>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, UpstreamError>>,
    {
        self.circuit(operation).exec(op, args, None).await
    }

    /// Stop every background task and drop pending work.
    pub fn shutdown(&self) {
        self.batches.shutdown();
        self.tokens.shutdown();
        self.cache.destroy();
        tracing::info!("Shield stopped");
    }
}
