//! Batch errors, events and executor types.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::resilience::UpstreamError;

/// What an executor returns: one value per key it could resolve.
pub type BatchOutput = Result<HashMap<String, Value>, UpstreamError>;

/// Type-erased executor stored with a pending batch.
pub type BatchExecutor = Box<dyn FnOnce(Vec<String>) -> BoxFuture<'static, BatchOutput> + Send>;

/// Errors delivered to batch waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The executor succeeded but returned nothing for this key.
    #[error("no result for key '{key}' in batch '{batch_id}'")]
    MissingKey { batch_id: String, key: String },

    /// The batch was cancelled before dispatch.
    #[error("batch '{0}' cancelled")]
    Cancelled(String),

    /// The executor itself failed; every waiter gets the same error.
    #[error("batch executor failed: {0}")]
    Executor(UpstreamError),

    /// The dispatch task went away without answering (e.g. it panicked).
    #[error("batch '{0}' was dropped before completing")]
    Abandoned(String),
}

/// Result type for batched requests.
pub type BatchResult<T> = Result<T, BatchError>;

/// Lifecycle notifications from the batching engine.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// The executor is about to run.
    Dispatched {
        batch_id: String,
        dispatch_id: Uuid,
        unique_keys: usize,
        waiters: usize,
    },

    /// The executor returned; `missing` keys had no result.
    Completed {
        batch_id: String,
        dispatch_id: Uuid,
        resolved: usize,
        missing: usize,
    },

    Failed {
        batch_id: String,
        dispatch_id: Uuid,
        error: UpstreamError,
    },

    Cancelled { batch_id: String, waiters: usize },

    /// Resident memory crossed the limit and the shared cache was cleared.
    MemoryPressure { resident_bytes: u64, limit_bytes: u64 },
}
