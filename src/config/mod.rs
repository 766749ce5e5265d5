//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → TimeoutConfig handed to each TimeoutEngine
//! ```
//!
//! # Design Decisions
//! - Config is immutable once an engine is built; a new config means a new engine
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::EngineConfig;
pub use schema::ObservabilityConfig;
pub use schema::Strategy;
pub use schema::TimeoutConfig;
