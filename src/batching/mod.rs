//! Request batching and coalescing.
//!
//! # Data Flow
//! ```text
//! batch_request(batch_id, key, executor)
//!     → cache hit under "batch:<batch_id>"? return it
//!     → join (or create) the pending batch for batch_id
//!         - creation arms a fixed dispatch timer (batch_delay)
//!         - reaching max_batch_size dispatches immediately
//!     → dispatch: dedupe keys → executor(unique_keys)
//!         - key present → cache + resolve every waiter for it
//!         - key absent → reject its waiters (MissingKey)
//!         - executor error → reject every waiter
//!
//! memory.rs (periodic):
//!     resident memory > limit → clear shared cache, emit MemoryPressure
//! ```
//!
//! # Design Decisions
//! - Waiters are a multi-map key → [oneshot senders]; duplicates share one result
//! - The creating caller's executor serves the whole batch
//! - A batch leaves the table when dispatched; the next call starts a new one
//! - Lifecycle notifications go out on a broadcast channel

pub mod engine;
pub mod memory;
pub mod types;

pub use engine::{batch_namespace, BatchEngine};
pub use memory::{MemoryProbe, ProcStatmProbe};
pub use types::{BatchError, BatchEvent, BatchExecutor, BatchOutput, BatchResult};
