//! TTL cache with next-to-expire eviction and content fingerprints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::cache::fingerprint::fingerprint;
use crate::config::CacheConfig;
use crate::lifecycle::{spawn_periodic, Shutdown};
use crate::observability::metrics;

/// Longest interval between background sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Errors raised by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value could not be serialized for fingerprinting.
    #[error("failed to fingerprint cached value: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Compose the storage key for a namespaced id.
pub fn compose_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// A stored value and its freshness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
    pub fingerprint: Option<String>,
    pub last_modified: Option<SystemTime>,
}

impl<V> CacheEntry<V> {
    /// An entry is dead from `expires_at` onwards.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_items: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

struct CacheInner<V> {
    entries: DashMap<String, CacheEntry<V>>,
    /// Serialises the capacity check with the insert that follows it.
    admission: Mutex<()>,
    default_ttl: Duration,
    max_items: usize,
    use_fingerprint: bool,
    counters: Counters,
}

impl<V> CacheInner<V> {
    /// Evict every expired entry. Returns the number removed.
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            self.counters.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, remaining = self.entries.len(), "Cache sweep evicted expired entries");
        }
        metrics::record_cache_size(self.entries.len());
        removed
    }

    /// Look up a live entry, evicting it if it has expired. No stats.
    fn live(&self, key: &str) -> Option<CacheEntry<V>>
    where
        V: Clone,
    {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.clone());
            }
        }
        if self.entries.remove_if(key, |_, entry| entry.is_expired(now)).is_some() {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Remove the entry with the smallest `expires_at`.
    fn evict_next_to_expire(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            if self.entries.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Cache at capacity, evicted next-to-expire entry");
            }
        }
    }
}

/// Thread-safe namespaced cache with per-entry expiry.
///
/// Owns a background sweeper that must be stopped with
/// [`TtlCache::destroy`]; dropping the cache stops it as well.
pub struct TtlCache<V> {
    inner: Arc<CacheInner<V>>,
    shutdown: Shutdown,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Create a cache and start its sweeper (when inside a Tokio runtime).
    pub fn new(config: &CacheConfig) -> Self {
        let inner = Arc::new(CacheInner {
            entries: DashMap::new(),
            admission: Mutex::new(()),
            default_ttl: config.ttl(),
            max_items: config.max_items.max(1),
            use_fingerprint: config.use_fingerprint,
            counters: Counters::default(),
        });
        let shutdown = Shutdown::new();

        let sweep_every = (config.ttl() / 2).min(MAX_SWEEP_INTERVAL);
        let sweeper = inner.clone();
        spawn_periodic("cache-sweep", sweep_every, shutdown.subscribe(), move || {
            sweeper.sweep();
        });

        Self { inner, shutdown }
    }

    /// Store `value` under `namespace:id`.
    ///
    /// At capacity, inserting a new key first evicts the entry that
    /// expires soonest.
    pub fn set(
        &self,
        namespace: &str,
        id: &str,
        value: V,
        ttl: Option<Duration>,
    ) -> CacheResult<CacheEntry<V>> {
        let key = compose_key(namespace, id);
        let etag = if self.inner.use_fingerprint {
            Some(fingerprint(&value)?)
        } else {
            None
        };

        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl.unwrap_or(self.inner.default_ttl),
            fingerprint: etag,
            last_modified: Some(SystemTime::now()),
        };

        {
            let _admission = self.inner.admission.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if !self.inner.entries.contains_key(&key) && self.inner.entries.len() >= self.inner.max_items {
                self.inner.evict_next_to_expire();
            }
            self.inner.entries.insert(key, entry.clone());
        }
        metrics::record_cache_size(self.inner.entries.len());

        Ok(entry)
    }

    /// Fetch a live entry. Expired entries are evicted and reported as a miss.
    pub fn get(&self, namespace: &str, id: &str) -> Option<CacheEntry<V>> {
        let found = self.inner.live(&compose_key(namespace, id));
        let counter = if found.is_some() {
            &self.inner.counters.hits
        } else {
            &self.inner.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(found.is_some());
        found
    }

    /// Whether the caller's copy is still current.
    ///
    /// True when a live entry's fingerprint equals `fingerprint`, or its
    /// last modification is at or before `modified_since`.
    pub fn is_fresh(
        &self,
        namespace: &str,
        id: &str,
        fingerprint: Option<&str>,
        modified_since: Option<SystemTime>,
    ) -> bool {
        let Some(entry) = self.inner.live(&compose_key(namespace, id)) else {
            return false;
        };

        let fingerprint_matches = match (fingerprint, entry.fingerprint.as_deref()) {
            (Some(wanted), Some(current)) => wanted == current,
            _ => false,
        };
        let unmodified = match (modified_since, entry.last_modified) {
            (Some(since), Some(modified)) => modified <= since,
            _ => false,
        };

        fingerprint_matches || unmodified
    }
}

impl<V> TtlCache<V> {
    /// Remove a single entry. Returns true if it existed.
    pub fn delete(&self, namespace: &str, id: &str) -> bool {
        self.inner.entries.remove(&compose_key(namespace, id)).is_some()
    }

    /// Remove one entry (`Some(id)`) or the whole namespace (`None`).
    pub fn invalidate(&self, namespace: &str, id: Option<&str>) -> usize {
        match id {
            Some(id) => usize::from(self.delete(namespace, id)),
            None => self.invalidate_namespace(namespace),
        }
    }

    /// Remove every entry whose key lives under `prefix`.
    pub fn invalidate_namespace(&self, prefix: &str) -> usize {
        let scope = format!("{prefix}:");
        let mut removed = 0;
        self.inner.entries.retain(|key, _| {
            let keep = !key.starts_with(&scope);
            if !keep {
                removed += 1;
            }
            keep
        });
        tracing::debug!(namespace = %prefix, removed, "Invalidated cache namespace");
        metrics::record_cache_size(self.inner.entries.len());
        removed
    }

    /// Evict expired entries now instead of waiting for the sweeper.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.entries.clear();
        metrics::record_cache_size(0);
    }

    /// Number of stored entries, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn get_stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            entries: self.inner.entries.len(),
            max_items: self.inner.max_items,
            hits,
            misses,
            evictions: counters.evictions.load(Ordering::Relaxed),
            expirations: counters.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
        }
    }

    /// Stop the sweeper and drop every entry.
    pub fn destroy(&self) {
        if self.shutdown.trigger() {
            tracing::debug!("Cache destroyed, sweeper stopped");
        }
        self.clear();
    }

    /// Whether [`TtlCache::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

impl<V> Drop for TtlCache<V> {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
