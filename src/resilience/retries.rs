//! Strategy executors.
//!
//! # Responsibilities
//! - Decide what happens after an attempt times out
//! - Track attempts, extensions and the timeout in force
//! - Shape the final `TimeoutResult` for each strategy
//!
//! # Strategies
//! ```text
//! FailFast:            attempt → timeout reported (retryable, retry_after = t × 1.5)
//! RetryWithBackoff:    attempt → sleep min(m^k, max_backoff) → t = min(t × m, max) → ...
//! GracefulDegradation: same as RetryWithBackoff
//! ExtendTimeout:       attempt → t = min(t × 1.5, max) immediately, at most 3 times
//! ```
//!
//! # Design Decisions
//! - Only timeouts are retried or extended; any other failure ends the call
//! - The run is a plain state machine so async and blocking callers share it
//! - GracefulDegradation needs per-operation knowledge of what a partial
//!   result is; until a caller supplies that, it forwards to RetryWithBackoff

use std::time::Duration;

use crate::config::{Strategy, TimeoutConfig};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::error::{
    Cause, Classification, ContextMap, EngineFailure, ErrorCategory, ErrorContext, ErrorSeverity,
    OperationError,
};
use crate::resilience::result::TimeoutResult;

/// Extensions ExtendTimeout may apply before giving up.
pub const MAX_EXTENSIONS: u32 = 3;

/// Growth factor applied to the timeout on each extension.
pub const EXTENSION_FACTOR: f64 = 1.5;

/// Multiplier for the retry-after hint on a fail-fast timeout.
const RETRY_AFTER_FACTOR: f64 = 1.5;

/// What to do after an attempt timed out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NextStep {
    /// Wait `delay`, then run another attempt with the (possibly larger) timeout.
    Retry { delay: Duration },
    /// The strategy's budget is spent.
    GiveUp,
}

impl Strategy {
    /// The algorithm that actually runs for this strategy.
    pub fn executor(self) -> Strategy {
        match self {
            Strategy::GracefulDegradation => Strategy::RetryWithBackoff,
            other => other,
        }
    }
}

/// State of one call under a strategy.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    strategy: Strategy,
    current_timeout: f64,
    attempt: u32,
    extensions: u32,
    retry_attempts: u32,
    backoff_multiplier: f64,
    max_backoff_secs: f64,
    backoff_jitter: bool,
    max_timeout_secs: f64,
}

impl StrategyRun {
    pub fn new(strategy: Strategy, initial_timeout: f64, config: &TimeoutConfig) -> Self {
        Self {
            strategy,
            current_timeout: initial_timeout.min(config.max_timeout_secs),
            attempt: 0,
            extensions: 0,
            retry_attempts: config.retry_attempts,
            backoff_multiplier: config.backoff_multiplier,
            max_backoff_secs: config.max_backoff_secs,
            backoff_jitter: config.backoff_jitter,
            max_timeout_secs: config.max_timeout_secs,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Timeout for the attempt about to run.
    pub fn current_timeout(&self) -> f64 {
        self.current_timeout
    }

    /// Attempts made beyond the first so far.
    pub fn retry_count(&self) -> u32 {
        self.attempt
    }

    pub fn extensions(&self) -> u32 {
        self.extensions
    }

    /// Advance after a timed-out attempt.
    pub fn on_timeout(&mut self) -> NextStep {
        match self.strategy.executor() {
            Strategy::FailFast => NextStep::GiveUp,
            Strategy::ExtendTimeout => {
                if self.extensions >= MAX_EXTENSIONS {
                    return NextStep::GiveUp;
                }
                self.extensions += 1;
                self.attempt += 1;
                self.current_timeout =
                    (self.current_timeout * EXTENSION_FACTOR).min(self.max_timeout_secs);
                NextStep::Retry {
                    delay: Duration::ZERO,
                }
            }
            _ => {
                if self.attempt >= self.retry_attempts {
                    return NextStep::GiveUp;
                }
                let delay = calculate_backoff(
                    self.attempt,
                    self.backoff_multiplier,
                    self.max_backoff_secs,
                    self.backoff_jitter,
                );
                self.attempt += 1;
                self.current_timeout =
                    (self.current_timeout * self.backoff_multiplier).min(self.max_timeout_secs);
                NextStep::Retry { delay }
            }
        }
    }

    fn extension_warning(&self) -> Option<String> {
        (self.extensions > 0).then(|| format!("used {} timeout extensions", self.extensions))
    }

    /// Result for an attempt that completed in time.
    pub fn succeed<T>(
        &self,
        value: T,
        duration_secs: f64,
        mut warnings: Vec<String>,
    ) -> TimeoutResult<T> {
        warnings.extend(self.extension_warning());
        TimeoutResult::succeeded(
            value,
            duration_secs,
            self.attempt,
            self.current_timeout,
            warnings,
        )
    }

    /// Result for an attempt that failed with something other than a timeout.
    pub fn fail<T>(
        &self,
        name: &str,
        cause: Cause,
        classification: Classification,
        context: ContextMap,
        duration_secs: f64,
        warnings: Vec<String>,
    ) -> TimeoutResult<T> {
        let mut error = OperationError::new(
            format!("Operation '{}' failed: {}", name, cause),
            classification.category,
            classification.severity,
            ErrorContext::new(name, context),
        )
        .with_cause(cause);
        error.is_retryable = classification.is_retryable;
        error.retry_after_secs = classification.retry_after_secs;

        TimeoutResult::failed(
            error,
            false,
            duration_secs,
            self.attempt,
            self.current_timeout,
            warnings,
        )
    }

    /// Result once `on_timeout` returned `GiveUp`.
    pub fn exhausted<T>(
        &self,
        name: &str,
        context: ContextMap,
        duration_secs: f64,
        mut warnings: Vec<String>,
    ) -> TimeoutResult<T> {
        let timeout = self.current_timeout;
        let cause = std::sync::Arc::new(EngineFailure::Elapsed {
            timeout_secs: timeout,
        });
        let context = ErrorContext::new(name, context);

        let error = match self.strategy.executor() {
            Strategy::FailFast => OperationError::new(
                format!("Operation '{}' timed out after {:.1}s", name, timeout),
                ErrorCategory::Timeout,
                ErrorSeverity::Medium,
                context,
            )
            .retryable(Some(timeout * RETRY_AFTER_FACTOR)),
            Strategy::ExtendTimeout => {
                warnings.push(format!("used {} timeout extensions", self.extensions));
                OperationError::new(
                    format!(
                        "Operation '{}' timed out after {} extensions (final timeout {:.1}s)",
                        name, self.extensions, timeout
                    ),
                    ErrorCategory::Timeout,
                    ErrorSeverity::High,
                    context,
                )
                .retryable(Some(timeout))
            }
            _ => OperationError::new(
                format!(
                    "Operation '{}' timed out after {} attempts (final timeout {:.1}s)",
                    name,
                    self.attempt + 1,
                    timeout
                ),
                ErrorCategory::Timeout,
                ErrorSeverity::High,
                context,
            ),
        }
        .with_cause(cause);

        TimeoutResult::failed(error, true, duration_secs, self.attempt, timeout, warnings)
    }
}
