//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call into the engine:
//!     → timeouts.rs (resolve effective timeout)
//!     → registry.rs (track the in-flight call)
//!     → engine.rs (attempt under deadline; sync_bridge.rs for blocking callers)
//!     → On timeout: retries.rs (strategy decides: retry with backoff.rs, extend, give up)
//!     → performance.rs (every attempt feeds adaptive timeouts)
//!     → TimeoutResult (result.rs / error.rs)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Only timeouts are retried; other failures are reported as-is
//! - The engine is a result-type boundary: it never returns Err and never panics
//! - Cancellation is bookkeeping only; running work is never interrupted

pub mod backoff;
pub mod combinator;
pub mod engine;
pub mod error;
pub mod performance;
pub mod registry;
pub mod result;
pub mod retries;
pub mod sync_bridge;
pub mod timeouts;

pub use combinator::{default_engine, install_default_engine, with_timeout, TimeoutGuarded};
pub use engine::{ExecuteOptions, TimeoutEngine};
pub use error::{
    Classification, ContextMap, DefaultClassifier, EngineFailure, ErrorCategory, ErrorClassifier,
    ErrorContext, ErrorSeverity, OperationError,
};
pub use performance::{PerformanceSample, PerformanceStats, PerformanceTracker};
pub use registry::{ActiveOperationGuard, ActiveOperationRegistry, ActiveOperationSnapshot};
pub use result::TimeoutResult;
pub use sync_bridge::{Deadline, DeadlineOutcome, PreemptiveTimer, WorkerThreadTimer};
