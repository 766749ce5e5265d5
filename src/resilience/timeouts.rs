//! Effective timeout resolution.
//!
//! # Responsibilities
//! - Pick the timeout enforced for a call
//! - Enforce the configured hard ceiling on every candidate
//!
//! # Resolution Order
//! ```text
//! explicit request
//!     → operation_timeout_overrides[name]
//!     → p95 of recorded successes × 1.5 (adaptive)
//!     → default_timeout_secs
//! ```
//!
//! # Design Decisions
//! - Non-positive candidates are skipped, so the result is always positive
//! - Adaptive stats are observational; they only shape later calls

use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::resilience::performance::PerformanceStats;

/// Headroom applied on top of the observed p95 latency.
pub const ADAPTIVE_HEADROOM: f64 = 1.5;

/// Resolve the timeout for `name`, capped at `max_timeout_secs`.
pub fn resolve_effective_timeout(
    config: &TimeoutConfig,
    name: &str,
    requested: Option<f64>,
    stats: Option<&PerformanceStats>,
) -> f64 {
    let adaptive = || {
        if !config.enable_adaptive_timeout {
            return None;
        }
        stats.map(|s| s.p95_duration * ADAPTIVE_HEADROOM)
    };

    let candidate = requested
        .filter(|t| is_usable(*t))
        .or_else(|| {
            config
                .operation_timeout_overrides
                .get(name)
                .copied()
                .filter(|t| is_usable(*t))
        })
        .or_else(|| adaptive().filter(|t| is_usable(*t)))
        .unwrap_or(config.default_timeout_secs);

    candidate.min(config.max_timeout_secs)
}

fn is_usable(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

/// Convert seconds to a `Duration`, clamping negative or non-finite input.
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}
