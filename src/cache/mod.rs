//! Namespaced TTL cache.
//!
//! # Data Flow
//! ```text
//! set(ns, id, value)
//!     → fingerprint.rs (optional SHA-256 of the JSON form)
//!     → at capacity and new key? evict the entry closest to expiry
//!     → store under "ns:id"
//!
//! get(ns, id)
//!     → expired? evict and report a miss
//!
//! Background sweep (every min(ttl / 2, 60s)):
//!     → evict every expired entry, accessed or not
//! ```
//!
//! # Design Decisions
//! - Eviction is strictly next-to-expire, not LRU
//! - Expiry uses the Tokio clock so paused-time tests are deterministic
//! - `destroy()` (or drop) stops the sweeper

pub mod fingerprint;
pub mod ttl;

pub use fingerprint::fingerprint;
pub use ttl::{compose_key, CacheEntry, CacheError, CacheResult, CacheStats, TtlCache};
