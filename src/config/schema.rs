//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration for the resilience engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout, retry and strategy tunables.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Recovery strategy applied when an attempt runs out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Single attempt, timeout reported immediately.
    FailFast,
    /// Retry timed-out attempts with geometric backoff and a growing timeout.
    #[default]
    RetryWithBackoff,
    /// Partial-result degradation. Currently runs `RetryWithBackoff`.
    GracefulDegradation,
    /// Retry timed-out attempts immediately with a longer timeout.
    ExtendTimeout,
}

impl Strategy {
    /// Stable snake_case name, used for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FailFast => "fail_fast",
            Strategy::RetryWithBackoff => "retry_with_backoff",
            Strategy::GracefulDegradation => "graceful_degradation",
            Strategy::ExtendTimeout => "extend_timeout",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for one engine instance. Immutable once the engine is built.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout used when nothing more specific applies, in seconds.
    pub default_timeout_secs: f64,

    /// Hard ceiling for any timeout the engine enforces, in seconds.
    pub max_timeout_secs: f64,

    /// Extra attempts beyond the first for the retry strategies.
    pub retry_attempts: u32,

    /// Growth factor for backoff sleeps and retried timeouts.
    pub backoff_multiplier: f64,

    /// Upper bound for a single backoff sleep, in seconds.
    pub max_backoff_secs: f64,

    /// Add 0-10% random jitter to backoff sleeps.
    pub backoff_jitter: bool,

    /// Strategy used unless a call overrides it.
    pub strategy: Strategy,

    /// Emit a warning when an attempt runs past `warning_threshold_ratio`.
    pub enable_timeout_warnings: bool,

    /// Fraction of the attempt timeout at which the slow warning fires.
    pub warning_threshold_ratio: f64,

    /// Derive timeouts from recorded latency when no override exists.
    pub enable_adaptive_timeout: bool,

    /// Per-operation timeouts in seconds, keyed by operation name.
    pub operation_timeout_overrides: HashMap<String, f64>,

    /// Worker threads allowed to keep running after a synchronous timeout.
    ///
    /// Every blocking attempt holds a slot until its job returns, so this also
    /// bounds concurrent blocking attempts.
    pub max_orphaned_workers: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30.0,
            max_timeout_secs: 300.0,
            retry_attempts: 3,
            backoff_multiplier: 2.0,
            max_backoff_secs: 60.0,
            backoff_jitter: false,
            strategy: Strategy::RetryWithBackoff,
            enable_timeout_warnings: true,
            warning_threshold_ratio: 0.8,
            enable_adaptive_timeout: true,
            operation_timeout_overrides: HashMap::new(),
            max_orphaned_workers: 16,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
