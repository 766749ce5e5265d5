//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ratios within bounds)
//! - Check per-operation overrides
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{EngineConfig, ObservabilityConfig, TimeoutConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: f64 },

    #[error("default_timeout_secs ({default}) exceeds max_timeout_secs ({max})")]
    DefaultAboveMax { default: f64, max: f64 },

    #[error("backoff_multiplier must be at least 1.0 (got {0})")]
    MultiplierBelowOne(f64),

    #[error("max_backoff_secs must not be negative (got {0})")]
    NegativeBackoff(f64),

    #[error("warning_threshold_ratio must be in (0, 1] (got {0})")]
    RatioOutOfRange(f64),

    #[error("timeout override for '{name}' must be greater than zero (got {value})")]
    InvalidOverride { name: String, value: f64 },

    #[error("max_orphaned_workers must be at least 1")]
    NoOrphanBudget,

    #[error("unknown log level '{0}'")]
    UnknownLogLevel(String),
}

/// Validate a full configuration, collecting every problem.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_timeouts(&config.timeouts, &mut errors);
    validate_observability(&config.observability, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_timeouts(config: &TimeoutConfig, errors: &mut Vec<ValidationError>) {
    // NaN fails every comparison, so `!(x > 0.0)` rejects it too.
    if !(config.default_timeout_secs > 0.0) {
        errors.push(ValidationError::NotPositive {
            field: "default_timeout_secs",
            value: config.default_timeout_secs,
        });
    }
    if !(config.max_timeout_secs > 0.0) {
        errors.push(ValidationError::NotPositive {
            field: "max_timeout_secs",
            value: config.max_timeout_secs,
        });
    }
    if config.default_timeout_secs > config.max_timeout_secs {
        errors.push(ValidationError::DefaultAboveMax {
            default: config.default_timeout_secs,
            max: config.max_timeout_secs,
        });
    }
    if !(config.backoff_multiplier >= 1.0) {
        errors.push(ValidationError::MultiplierBelowOne(config.backoff_multiplier));
    }
    if !(config.max_backoff_secs >= 0.0) {
        errors.push(ValidationError::NegativeBackoff(config.max_backoff_secs));
    }
    if !(config.warning_threshold_ratio > 0.0 && config.warning_threshold_ratio <= 1.0) {
        errors.push(ValidationError::RatioOutOfRange(config.warning_threshold_ratio));
    }

    let mut overrides: Vec<_> = config.operation_timeout_overrides.iter().collect();
    overrides.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in overrides {
        if !(*value > 0.0) {
            errors.push(ValidationError::InvalidOverride {
                name: name.clone(),
                value: *value,
            });
        }
    }

    if config.max_orphaned_workers == 0 {
        errors.push(ValidationError::NoOrphanBudget);
    }
}

fn validate_observability(config: &ObservabilityConfig, errors: &mut Vec<ValidationError>) {
    let level = config.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.log_level.clone()));
    }
}
