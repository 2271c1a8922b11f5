//! Lifecycle management for background work.
//!
//! # Data Flow
//! ```text
//! Component constructed:
//!     → Shutdown::new() owned by the component
//!     → periodic.rs spawns a select! loop (tick | shutdown)
//!
//! Component shutdown (destroy / shutdown):
//!     → Shutdown::trigger()
//!     → every loop subscribed to that coordinator exits on its next poll
//! ```
//!
//! # Design Decisions
//! - Each component owns its own coordinator; nothing is process-global
//! - Timers never outlive an explicit shutdown
//! - Spawning outside a Tokio runtime degrades to "no background task"

pub mod periodic;
pub mod shutdown;

pub use periodic::spawn_periodic;
pub use shutdown::Shutdown;
