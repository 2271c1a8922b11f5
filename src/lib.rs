//! Resilience and resource-management layer for a remote HTTP API.

pub mod batching;
pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod shield;
pub mod tokens;

pub use config::ShieldConfig;
pub use lifecycle::Shutdown;
pub use shield::Shield;
