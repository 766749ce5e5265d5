//! The timeout engine.
//!
//! # Responsibilities
//! - Resolve the effective timeout for each call
//! - Run attempts under a deadline, async or blocking
//! - Drive the configured strategy between attempts
//! - Record every attempt for adaptive timeouts
//! - Track in-flight calls for introspection and cancellation
//!
//! # Data Flow
//! ```text
//! execute_async / execute_sync
//!     → timeouts.rs (effective timeout)
//!     → registry.rs (register, guard removes on exit)
//!     → attempt (deadline + slow warning)
//!         → performance.rs (sample per attempt)
//!     → retries.rs (retry, extend or give up)
//!     → TimeoutResult (never an Err, never a panic)
//! ```

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::config::{Strategy, TimeoutConfig};
use crate::observability::metrics;
use crate::resilience::error::{
    Cause, ContextMap, DefaultClassifier, EngineFailure, ErrorClassifier,
};
use crate::resilience::performance::{PerformanceStats, PerformanceTracker};
use crate::resilience::registry::{ActiveOperationRegistry, ActiveOperationSnapshot};
use crate::resilience::result::TimeoutResult;
use crate::resilience::retries::{NextStep, StrategyRun};
use crate::resilience::sync_bridge::{detect_timer, Deadline, DeadlineOutcome, Job, PreemptiveTimer};
use crate::resilience::timeouts::{resolve_effective_timeout, secs_to_duration};

/// Per-call options beyond the operation and its name.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Explicit timeout in seconds; wins over overrides and adaptive values.
    pub timeout: Option<f64>,
    pub context: Option<ContextMap>,
    /// Use this strategy instead of the configured one.
    pub strategy: Option<Strategy>,
}

impl ExecuteOptions {
    pub fn timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn context(mut self, context: ContextMap) -> Self {
        self.context = Some(context);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

enum AttemptOutcome<T> {
    Completed(T),
    TimedOut,
    Failed(Cause),
}

impl<T> AttemptOutcome<T> {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Completed(_) => "success",
            AttemptOutcome::TimedOut => "timeout",
            AttemptOutcome::Failed(_) => "error",
        }
    }
}

/// Strategy-driven executor wrapping operations with timeouts.
pub struct TimeoutEngine {
    config: TimeoutConfig,
    performance: PerformanceTracker,
    registry: ActiveOperationRegistry,
    classifier: Arc<dyn ErrorClassifier>,
    timer: Arc<dyn PreemptiveTimer>,
}

impl fmt::Debug for TimeoutEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutEngine")
            .field("config", &self.config)
            .field("active_operations", &self.registry.len())
            .field("timer", &self.timer.name())
            .finish()
    }
}

impl Default for TimeoutEngine {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}

impl TimeoutEngine {
    pub fn new(config: TimeoutConfig) -> Self {
        let timer = detect_timer(&config);
        Self {
            config,
            performance: PerformanceTracker::new(),
            registry: ActiveOperationRegistry::new(),
            classifier: Arc::new(DefaultClassifier),
            timer,
        }
    }

    /// Replace the fallback error classifier.
    pub fn with_classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Replace the timer used by the blocking path.
    pub fn with_timer(mut self, timer: impl PreemptiveTimer + 'static) -> Self {
        self.timer = Arc::new(timer);
        self
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    pub fn registry(&self) -> &ActiveOperationRegistry {
        &self.registry
    }

    /// Timeout that a call to `name` would start with.
    pub fn effective_timeout(&self, name: &str, requested: Option<f64>) -> f64 {
        let stats = self.performance.stats(name);
        resolve_effective_timeout(&self.config, name, requested, stats.as_ref())
    }

    pub fn get_operation_stats(&self, name: &str) -> Option<PerformanceStats> {
        self.performance.stats(name)
    }

    pub fn get_active_operations(&self) -> HashMap<String, ActiveOperationSnapshot> {
        self.registry.snapshot()
    }

    /// Forget an in-flight call. Does not interrupt it.
    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        self.registry.cancel(operation_id)
    }

    /// Run an async operation under the configured strategy.
    pub async fn execute_async<F, Fut, T, E>(
        &self,
        operation: F,
        name: &str,
        timeout: Option<f64>,
        context: Option<ContextMap>,
    ) -> TimeoutResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let options = ExecuteOptions {
            timeout,
            context,
            strategy: None,
        };
        self.execute_async_with(operation, name, options).await
    }

    pub async fn execute_async_with<F, Fut, T, E>(
        &self,
        mut operation: F,
        name: &str,
        options: ExecuteOptions,
    ) -> TimeoutResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let started = tokio::time::Instant::now();
        let context = options.context.unwrap_or_default();
        let strategy = options.strategy.unwrap_or(self.config.strategy);
        let timeout = self.effective_timeout(name, options.timeout);

        let guard = self.registry.register(name, timeout, context.clone());
        tracing::debug!(
            operation = name,
            operation_id = guard.operation_id(),
            timeout_secs = timeout,
            strategy = %strategy,
            "Dispatching operation"
        );

        let mut run = StrategyRun::new(strategy, timeout, &self.config);
        let mut warnings = Vec::new();

        let result = loop {
            let attempt_timeout = run.current_timeout();
            let outcome = self
                .attempt_async(&mut operation, name, attempt_timeout, &mut warnings)
                .await;

            match outcome {
                AttemptOutcome::Completed(value) => {
                    break run.succeed(value, started.elapsed().as_secs_f64(), warnings);
                }
                AttemptOutcome::Failed(cause) => {
                    let classification = self.classifier.classify(cause.as_ref());
                    let elapsed = started.elapsed().as_secs_f64();
                    break run.fail(name, cause, classification, context, elapsed, warnings);
                }
                AttemptOutcome::TimedOut => match run.on_timeout() {
                    NextStep::Retry { delay } => {
                        log_next_attempt(name, &run, delay);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    NextStep::GiveUp => {
                        let elapsed = started.elapsed().as_secs_f64();
                        break run.exhausted(name, context, elapsed, warnings);
                    }
                },
            }
        };

        drop(guard);
        finish(name, &run, &result);
        result
    }

    async fn attempt_async<F, Fut, T, E>(
        &self,
        operation: &mut F,
        name: &str,
        timeout_secs: f64,
        warnings: &mut Vec<String>,
    ) -> AttemptOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let started = tokio::time::Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(&mut *operation)) {
            Ok(future) => self.await_with_deadline(future, name, timeout_secs, warnings).await,
            Err(payload) => AttemptOutcome::Failed(Arc::new(EngineFailure::from_panic(payload))),
        };
        self.record_attempt(name, started.elapsed().as_secs_f64(), timeout_secs, &outcome);
        outcome
    }

    async fn await_with_deadline<Fut, T, E>(
        &self,
        future: Fut,
        name: &str,
        timeout_secs: f64,
        warnings: &mut Vec<String>,
    ) -> AttemptOutcome<T>
    where
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let limit = secs_to_duration(timeout_secs);
        let warn_after = self.warn_after(limit);

        let guarded = tokio::time::timeout(limit, AssertUnwindSafe(future).catch_unwind());
        tokio::pin!(guarded);
        let warning = tokio::time::sleep(warn_after.unwrap_or(limit));
        tokio::pin!(warning);
        let mut armed = warn_after.is_some();

        let settled = loop {
            tokio::select! {
                biased;
                settled = &mut guarded => break settled,
                _ = &mut warning, if armed => {
                    armed = false;
                    self.announce_slow(name, timeout_secs);
                    warnings.push(self.slow_warning_text(name, timeout_secs));
                }
            }
        };

        match settled {
            Ok(Ok(Ok(value))) => AttemptOutcome::Completed(value),
            Ok(Ok(Err(error))) => AttemptOutcome::Failed(Arc::new(error)),
            Ok(Err(payload)) => {
                AttemptOutcome::Failed(Arc::new(EngineFailure::from_panic(payload)))
            }
            Err(_elapsed) => AttemptOutcome::TimedOut,
        }
    }

    /// Run a blocking operation under the configured strategy.
    ///
    /// Each attempt runs on the engine's `PreemptiveTimer`. A timed-out attempt
    /// keeps running in the background; it is never forcibly stopped. Call
    /// this from `spawn_blocking` when inside an async runtime.
    pub fn execute_sync<F, T, E>(
        &self,
        operation: F,
        name: &str,
        timeout: Option<f64>,
        context: Option<ContextMap>,
    ) -> TimeoutResult<T>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let options = ExecuteOptions {
            timeout,
            context,
            strategy: None,
        };
        self.execute_sync_with(operation, name, options)
    }

    pub fn execute_sync_with<F, T, E>(
        &self,
        operation: F,
        name: &str,
        options: ExecuteOptions,
    ) -> TimeoutResult<T>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let started = std::time::Instant::now();
        let operation = Arc::new(operation);
        let context = options.context.unwrap_or_default();
        let strategy = options.strategy.unwrap_or(self.config.strategy);
        let timeout = self.effective_timeout(name, options.timeout);

        let guard = self.registry.register(name, timeout, context.clone());
        tracing::debug!(
            operation = name,
            operation_id = guard.operation_id(),
            timeout_secs = timeout,
            strategy = %strategy,
            timer = self.timer.name(),
            "Dispatching blocking operation"
        );

        let mut run = StrategyRun::new(strategy, timeout, &self.config);
        let mut warnings = Vec::new();

        let result = loop {
            let attempt_timeout = run.current_timeout();
            match self.attempt_sync(&operation, name, attempt_timeout, &mut warnings) {
                AttemptOutcome::Completed(value) => {
                    break run.succeed(value, started.elapsed().as_secs_f64(), warnings);
                }
                AttemptOutcome::Failed(cause) => {
                    let classification = self.classifier.classify(cause.as_ref());
                    let elapsed = started.elapsed().as_secs_f64();
                    break run.fail(name, cause, classification, context, elapsed, warnings);
                }
                AttemptOutcome::TimedOut => match run.on_timeout() {
                    NextStep::Retry { delay } => {
                        log_next_attempt(name, &run, delay);
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                    NextStep::GiveUp => {
                        let elapsed = started.elapsed().as_secs_f64();
                        break run.exhausted(name, context, elapsed, warnings);
                    }
                },
            }
        };

        drop(guard);
        finish(name, &run, &result);
        result
    }

    fn attempt_sync<F, T, E>(
        &self,
        operation: &Arc<F>,
        name: &str,
        timeout_secs: f64,
        warnings: &mut Vec<String>,
    ) -> AttemptOutcome<T>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let started = std::time::Instant::now();
        let limit = secs_to_duration(timeout_secs);
        let (tx, rx) = mpsc::channel();
        let op = Arc::clone(operation);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| op()));
            let _ = tx.send(outcome);
        });

        let deadline = Deadline {
            timeout: limit,
            warn_after: self.warn_after(limit),
        };
        let on_slow = || self.announce_slow(name, timeout_secs);
        let verdict = match self.timer.run_with_deadline(job, deadline, &on_slow) {
            Ok(verdict) => verdict,
            // The job never ran, so there is no sample to record.
            Err(refused) => return AttemptOutcome::Failed(Arc::new(refused)),
        };

        if verdict.warned() {
            warnings.push(self.slow_warning_text(name, timeout_secs));
        }

        let outcome = match verdict {
            DeadlineOutcome::Expired { .. } => AttemptOutcome::TimedOut,
            DeadlineOutcome::Completed { .. } => match rx.try_recv() {
                Ok(Ok(Ok(value))) => AttemptOutcome::Completed(value),
                Ok(Ok(Err(error))) => AttemptOutcome::Failed(Arc::new(error)),
                Ok(Err(payload)) => {
                    AttemptOutcome::Failed(Arc::new(EngineFailure::from_panic(payload)))
                }
                Err(_) => AttemptOutcome::Failed(Arc::new(EngineFailure::WorkerLost)),
            },
        };
        self.record_attempt(name, started.elapsed().as_secs_f64(), timeout_secs, &outcome);
        outcome
    }

    fn warn_after(&self, limit: Duration) -> Option<Duration> {
        if !self.config.enable_timeout_warnings {
            return None;
        }
        let at = secs_to_duration(limit.as_secs_f64() * self.config.warning_threshold_ratio);
        (at < limit).then_some(at)
    }

    /// Log and count a slow attempt. Called while the attempt is still running.
    fn announce_slow(&self, name: &str, timeout_secs: f64) {
        tracing::warn!(
            operation = name,
            timeout_secs,
            threshold_ratio = self.config.warning_threshold_ratio,
            "Operation is running long"
        );
        metrics::record_slow_warning(name);
    }

    fn slow_warning_text(&self, name: &str, timeout_secs: f64) -> String {
        let percent = self.config.warning_threshold_ratio * 100.0;
        format!(
            "operation '{}' exceeded {:.0}% of its {:.1}s timeout",
            name, percent, timeout_secs
        )
    }

    fn record_attempt<T>(
        &self,
        name: &str,
        duration_secs: f64,
        timeout_secs: f64,
        outcome: &AttemptOutcome<T>,
    ) {
        let success = matches!(outcome, AttemptOutcome::Completed(_));
        self.performance.record(name, duration_secs, success);
        metrics::record_attempt(name, outcome.label());

        if let AttemptOutcome::TimedOut = outcome {
            tracing::warn!(operation = name, timeout_secs, "Attempt timed out");
        }
    }
}

fn log_next_attempt(name: &str, run: &StrategyRun, delay: Duration) {
    if run.strategy().executor() == Strategy::ExtendTimeout {
        tracing::info!(
            operation = name,
            extension = run.extensions(),
            next_timeout_secs = run.current_timeout(),
            "Extending timeout"
        );
    } else {
        tracing::info!(
            operation = name,
            attempt = run.retry_count() + 1,
            next_timeout_secs = run.current_timeout(),
            delay_ms = delay.as_millis() as u64,
            "Retrying after timeout"
        );
    }
}

fn finish<T>(name: &str, run: &StrategyRun, result: &TimeoutResult<T>) {
    metrics::record_operation(name, run.strategy().as_str(), result.success, result.duration_secs);

    match &result.error {
        None => tracing::debug!(
            operation = name,
            duration_secs = result.duration_secs,
            retry_count = result.retry_count,
            "Operation completed"
        ),
        Some(error) if result.timeout_occurred => tracing::error!(
            operation = name,
            retry_count = result.retry_count,
            final_timeout_secs = result.final_timeout_used,
            error_id = %error.error_id,
            "{}",
            error.message
        ),
        Some(error) => tracing::warn!(
            operation = name,
            category = ?error.category,
            error_id = %error.error_id,
            "{}",
            error.message
        ),
    }
}
