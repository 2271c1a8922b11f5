//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! expose `Duration` accessors for their `*_ms` fields.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the shield.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Shared TTL cache.
    pub cache: CacheConfig,

    /// Defaults for circuits created lazily by `Shield::call`.
    pub circuit: CircuitConfig,

    /// Request batching engine.
    pub batch: BatchConfig,

    /// Proactive token refresh.
    pub tokens: TokenConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// TTL cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default entry lifetime in milliseconds.
    pub ttl_ms: u64,

    /// Maximum number of entries before next-to-expire eviction.
    pub max_items: usize,

    /// Compute a content fingerprint (ETag) for every stored value.
    pub use_fingerprint: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            max_items: 1000,
            use_fingerprint: true,
        }
    }
}

/// Circuit breaker defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive classified failures before opening.
    pub failure_threshold: u32,

    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,

    /// Time spent open before probing, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Deadline for each wrapped call, in milliseconds.
    pub request_timeout_ms: u64,

    /// Deadline for the first call a circuit ever makes, in milliseconds.
    pub initial_request_timeout_ms: u64,

    /// Concurrent probe calls allowed while half-open.
    pub half_open_max_probes: u32,
}

impl CircuitConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn initial_request_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_request_timeout_ms)
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            request_timeout_ms: 10_000,
            initial_request_timeout_ms: 30_000,
            half_open_max_probes: 1,
        }
    }
}

/// Request batching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Pending keys that force an immediate dispatch.
    pub max_batch_size: usize,

    /// Fixed delay from batch creation to dispatch, in milliseconds.
    pub batch_delay_ms: u64,

    /// Lifetime of per-key results cached after a dispatch, in milliseconds.
    pub cache_ttl_ms: u64,

    /// Resident memory above which the shared cache is purged, in bytes.
    pub max_memory_usage_bytes: u64,

    /// Interval between memory checks, in milliseconds. Zero disables the check.
    pub memory_check_interval_ms: u64,
}

impl BatchConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_millis(self.memory_check_interval_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            batch_delay_ms: 10,
            cache_ttl_ms: 60_000,
            max_memory_usage_bytes: 512 * 1024 * 1024,
            memory_check_interval_ms: 30_000,
        }
    }
}

/// Token refresh configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// How long before expiry a refresh fires, in milliseconds.
    pub refresh_margin_ms: u64,

    /// Attempts per refresh before giving up.
    pub max_refresh_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay, in milliseconds.
    pub max_backoff_ms: u64,

    /// Keep retrying when the issuer rejects the credential.
    pub retry_on_auth_error: bool,

    /// Validity used when a request does not specify one, in milliseconds.
    pub default_validity_ms: u64,

    /// Deadline for each call to the token issuer, in milliseconds.
    pub request_timeout_ms: u64,
}

impl TokenConfig {
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_millis(self.refresh_margin_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn default_validity(&self) -> Duration {
        Duration::from_millis(self.default_validity_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_margin_ms: 300_000,
            max_refresh_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            retry_on_auth_error: false,
            default_validity_ms: 3_600_000,
            request_timeout_ms: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
