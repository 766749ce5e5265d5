//! Timeout and retry resilience engine.
//!
//! Wraps slow or unreliable calls with timeout enforcement, recovery
//! strategies, adaptive timeouts learned from past latency, and best-effort
//! cancellation bookkeeping.

pub mod config;
pub mod observability;
pub mod resilience;

pub use config::schema::{EngineConfig, Strategy, TimeoutConfig};
pub use resilience::{
    default_engine, install_default_engine, with_timeout, ExecuteOptions, OperationError,
    TimeoutEngine, TimeoutResult,
};
