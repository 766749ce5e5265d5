//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! TimeoutEngine produces:
//!     → logging.rs (structured log events: dispatch, slow warnings, retries)
//!     → metrics.rs (attempt counters, duration histograms, orphan gauge)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape, CLI only)
//! ```
//!
//! # Design Decisions
//! - Operation name and id flow through every log event
//! - Metric calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
