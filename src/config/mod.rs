//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ShieldConfig (validated, immutable)
//!     → converted into per-component options by Shield::new
//! ```
//!
//! # Design Decisions
//! - Every section has defaults so an empty file is a valid config
//! - Durations are integer milliseconds in the file, `Duration` in code
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BatchConfig, CacheConfig, CircuitConfig, ObservabilityConfig, ShieldConfig, TokenConfig,
};
pub use validation::{validate_config, ValidationError};
