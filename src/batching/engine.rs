//! Batching engine.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::batching::memory::{MemoryProbe, ProcStatmProbe};
use crate::batching::types::{BatchError, BatchEvent, BatchExecutor, BatchOutput, BatchResult};
use crate::cache::TtlCache;
use crate::config::BatchConfig;
use crate::lifecycle::{spawn_periodic, Shutdown};
use crate::observability::metrics;

const EVENT_CAPACITY: usize = 256;

/// Cache namespace holding results for `batch_id`.
pub fn batch_namespace(batch_id: &str) -> String {
    format!("batch:{batch_id}")
}

type Waiter = oneshot::Sender<BatchResult<Value>>;

/// A batch that has not been dispatched yet.
struct PendingBatch {
    /// Distinguishes successive batches that reuse the same id.
    serial: u64,
    batch_id: String,
    pending_keys: Vec<String>,
    waiters: HashMap<String, Vec<Waiter>>,
    created_at: Instant,
    executor: BatchExecutor,
    timer: Option<JoinHandle<()>>,
}

impl PendingBatch {
    fn waiter_count(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }

    fn reject_all(self, error: &BatchError) -> usize {
        let mut rejected = 0;
        for waiter in self.waiters.into_values().flatten() {
            let _ = waiter.send(Err(error.clone()));
            rejected += 1;
        }
        rejected
    }
}

struct EngineInner {
    config: BatchConfig,
    cache: Arc<TtlCache<Value>>,
    batches: Mutex<HashMap<String, PendingBatch>>,
    dispatching: Mutex<HashMap<String, usize>>,
    events: broadcast::Sender<BatchEvent>,
    next_serial: AtomicU64,
}

impl EngineInner {
    fn batches(&self) -> MutexGuard<'_, HashMap<String, PendingBatch>> {
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatching(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.dispatching.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.events.send(event);
    }

    /// Remove the pending batch if it is still generation `serial`.
    fn take_if_current(&self, batch_id: &str, serial: u64) -> Option<PendingBatch> {
        let mut batches = self.batches();
        match batches.get(batch_id) {
            Some(batch) if batch.serial == serial => batches.remove(batch_id),
            _ => None,
        }
    }

    fn check_memory(&self, probe: &dyn MemoryProbe) -> Option<u64> {
        let limit = self.config.max_memory_usage_bytes;
        let resident = probe.resident_bytes()?;
        if limit > 0 && resident > limit {
            let purged = self.cache.len();
            self.cache.clear();
            metrics::record_memory_pressure();
            tracing::warn!(
                resident_bytes = resident,
                limit_bytes = limit,
                purged_entries = purged,
                "Memory limit exceeded, cleared shared cache"
            );
            self.emit(BatchEvent::MemoryPressure {
                resident_bytes: resident,
                limit_bytes: limit,
            });
        }
        Some(resident)
    }
}

/// Marks a batch id as dispatching for as long as it lives.
struct DispatchGuard {
    inner: Arc<EngineInner>,
    batch_id: String,
}

impl DispatchGuard {
    fn new(inner: Arc<EngineInner>, batch_id: &str) -> Self {
        *inner.dispatching().entry(batch_id.to_string()).or_insert(0) += 1;
        Self {
            inner,
            batch_id: batch_id.to_string(),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        let mut dispatching = self.inner.dispatching();
        if let Entry::Occupied(mut entry) = dispatching.entry(self.batch_id.clone()) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }
}

/// Coalesces concurrent per-key requests into one downstream call per batch.
pub struct BatchEngine {
    inner: Arc<EngineInner>,
    probe: Arc<dyn MemoryProbe>,
    shutdown: Shutdown,
}

impl BatchEngine {
    /// Create an engine reading resident memory from `/proc/self/statm`.
    pub fn new(config: &BatchConfig, cache: Arc<TtlCache<Value>>) -> Self {
        Self::with_probe(config, cache, Arc::new(ProcStatmProbe))
    }

    /// Create an engine with a custom memory probe.
    ///
    /// The memory check runs only when `memory_check_interval_ms` is
    /// non-zero and a Tokio runtime is available.
    pub fn with_probe(config: &BatchConfig, cache: Arc<TtlCache<Value>>, probe: Arc<dyn MemoryProbe>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(EngineInner {
            config: config.clone(),
            cache,
            batches: Mutex::new(HashMap::new()),
            dispatching: Mutex::new(HashMap::new()),
            events,
            next_serial: AtomicU64::new(1),
        });
        let shutdown = Shutdown::new();

        if config.memory_check_interval_ms > 0 {
            let monitor = inner.clone();
            let monitor_probe = probe.clone();
            spawn_periodic(
                "memory-check",
                config.memory_check_interval(),
                shutdown.subscribe(),
                move || {
                    monitor.check_memory(monitor_probe.as_ref());
                },
            );
        }

        Self { inner, probe, shutdown }
    }

    /// Resolve `key` as part of the batch `batch_id`.
    ///
    /// Cached results return immediately. Otherwise the request joins the
    /// pending batch; if it creates that batch, its `executor` is the one
    /// that will be called with the batch's unique keys.
    pub async fn batch_request<F, Fut>(&self, batch_id: &str, key: &str, executor: F) -> BatchResult<Value>
    where
        F: FnOnce(Vec<String>) -> Fut + Send + 'static,
        Fut: Future<Output = BatchOutput> + Send + 'static,
    {
        if let Some(entry) = self.inner.cache.get(&batch_namespace(batch_id), key) {
            tracing::trace!(batch_id, key, "Batch cache hit");
            return Ok(entry.value);
        }

        let (tx, rx) = oneshot::channel();
        let full = {
            let mut batches = self.inner.batches();
            let batch = match batches.entry(batch_id.to_string()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.create_batch(batch_id, executor)),
            };

            batch.pending_keys.push(key.to_string());
            batch.waiters.entry(key.to_string()).or_default().push(tx);

            if batch.pending_keys.len() >= self.inner.config.max_batch_size {
                batches.remove(batch_id)
            } else {
                None
            }
        };

        if let Some(mut batch) = full {
            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }
            tracing::debug!(batch_id, keys = batch.pending_keys.len(), "Batch full, dispatching early");
            tokio::spawn(dispatch(self.inner.clone(), batch));
        }

        rx.await
            .unwrap_or_else(|_| Err(BatchError::Abandoned(batch_id.to_string())))
    }

    /// True while a batch is pending or its executor is running.
    pub fn is_batch_in_progress(&self, batch_id: &str) -> bool {
        self.inner.batches().contains_key(batch_id) || self.inner.dispatching().contains_key(batch_id)
    }

    /// Number of keys (duplicates included) waiting in the pending batch.
    pub fn pending_keys(&self, batch_id: &str) -> usize {
        self.inner
            .batches()
            .get(batch_id)
            .map_or(0, |batch| batch.pending_keys.len())
    }

    /// Reject every waiter of the pending batch with [`BatchError::Cancelled`].
    ///
    /// Returns false when nothing was pending; an executor that is already
    /// running is not affected.
    pub fn cancel_batch(&self, batch_id: &str) -> bool {
        let Some(mut batch) = self.inner.batches().remove(batch_id) else {
            return false;
        };
        if let Some(timer) = batch.timer.take() {
            timer.abort();
        }

        let waiters = batch.reject_all(&BatchError::Cancelled(batch_id.to_string()));
        tracing::info!(batch_id, waiters, "Batch cancelled");
        self.inner.emit(BatchEvent::Cancelled {
            batch_id: batch_id.to_string(),
            waiters,
        });
        true
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Run the memory check now. Returns the measured resident size.
    pub fn check_memory(&self) -> Option<u64> {
        self.inner.check_memory(self.probe.as_ref())
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.inner.cache
    }

    /// Stop the memory monitor and cancel every pending batch.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        let pending: Vec<String> = self.inner.batches().keys().cloned().collect();
        for batch_id in pending {
            self.cancel_batch(&batch_id);
        }
    }

    fn create_batch<F, Fut>(&self, batch_id: &str, executor: F) -> PendingBatch
    where
        F: FnOnce(Vec<String>) -> Fut + Send + 'static,
        Fut: Future<Output = BatchOutput> + Send + 'static,
    {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let executor: BatchExecutor = Box::new(move |keys| Box::pin(executor(keys)));

        let inner = self.inner.clone();
        let id = batch_id.to_string();
        let delay = self.inner.config.batch_delay();
        let timer = tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(batch) = inner.take_if_current(&id, serial) {
                dispatch(inner, batch).await;
            }
        });

        tracing::trace!(batch_id, serial, "Batch created");
        PendingBatch {
            serial,
            batch_id: batch_id.to_string(),
            pending_keys: Vec::new(),
            waiters: HashMap::new(),
            created_at: Instant::now(),
            executor,
            timer: Some(timer),
        }
    }
}

impl Drop for BatchEngine {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Keys in first-seen order, each once.
fn dedupe(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|key| seen.insert(key.as_str()))
        .cloned()
        .collect()
}

/// Run the executor for `batch` and settle every waiter.
async fn dispatch(inner: Arc<EngineInner>, batch: PendingBatch) {
    let _guard = DispatchGuard::new(inner.clone(), &batch.batch_id);
    let dispatch_id = Uuid::new_v4();

    let unique_keys = dedupe(&batch.pending_keys);

    tracing::debug!(
        batch_id = %batch.batch_id,
        %dispatch_id,
        unique_keys = unique_keys.len(),
        pending_keys = batch.pending_keys.len(),
        waited_ms = batch.created_at.elapsed().as_millis() as u64,
        "Dispatching batch"
    );
    inner.emit(BatchEvent::Dispatched {
        batch_id: batch.batch_id.clone(),
        dispatch_id,
        unique_keys: unique_keys.len(),
        waiters: batch.waiter_count(),
    });

    let unique_count = unique_keys.len();
    let PendingBatch {
        batch_id,
        waiters,
        executor,
        ..
    } = batch;

    match executor(unique_keys).await {
        Ok(results) => {
            let namespace = batch_namespace(&batch_id);
            let ttl = Some(inner.config.cache_ttl());
            let mut resolved = 0;
            let mut missing = 0;

            for (key, key_waiters) in waiters {
                match results.get(&key) {
                    Some(value) => {
                        if let Err(e) = inner.cache.set(&namespace, &key, value.clone(), ttl) {
                            tracing::warn!(batch_id = %batch_id, key = %key, error = %e, "Failed to cache batch result");
                        }
                        for waiter in key_waiters {
                            let _ = waiter.send(Ok(value.clone()));
                        }
                        resolved += 1;
                    }
                    None => {
                        let error = BatchError::MissingKey {
                            batch_id: batch_id.clone(),
                            key: key.clone(),
                        };
                        for waiter in key_waiters {
                            let _ = waiter.send(Err(error.clone()));
                        }
                        missing += 1;
                    }
                }
            }

            if missing > 0 {
                tracing::warn!(batch_id = %batch_id, %dispatch_id, missing, "Executor omitted requested keys");
            }
            metrics::record_batch_dispatch(&batch_id, unique_count, "success");
            inner.emit(BatchEvent::Completed {
                batch_id,
                dispatch_id,
                resolved,
                missing,
            });
        }
        Err(error) => {
            tracing::warn!(batch_id = %batch_id, %dispatch_id, error = %error, "Batch executor failed");
            let rejection = BatchError::Executor(error.clone());
            for waiter in waiters.into_values().flatten() {
                let _ = waiter.send(Err(rejection.clone()));
            }
            metrics::record_batch_dispatch(&batch_id, unique_count, "error");
            inner.emit(BatchEvent::Failed {
                batch_id,
                dispatch_id,
                error,
            });
        }
    }
}
