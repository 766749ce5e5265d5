//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilience_engine::{Strategy, TimeoutConfig, TimeoutEngine};

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("access denied for {0}")]
    Denied(String),
    #[error("throttled")]
    Throttled,
}

/// Engine with a short default timeout and no adaptive drift.
pub fn engine(strategy: Strategy, default_timeout_secs: f64) -> TimeoutEngine {
    TimeoutEngine::new(config(strategy, default_timeout_secs))
}

pub fn config(strategy: Strategy, default_timeout_secs: f64) -> TimeoutConfig {
    TimeoutConfig {
        strategy,
        default_timeout_secs,
        retry_attempts: 2,
        enable_adaptive_timeout: false,
        ..TimeoutConfig::default()
    }
}

/// Counts how many times an operation was invoked.
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    /// Register a call, returning its 1-based number.
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

pub type OpFuture = Pin<Box<dyn Future<Output = Result<&'static str, TestError>> + Send>>;

/// Async operation that sleeps `delays[n]` on call `n` (last entry repeats)
/// and then returns `value`.
pub fn delayed_op(
    counter: CallCounter,
    delays: Vec<Duration>,
    value: &'static str,
) -> impl FnMut() -> OpFuture + Send + 'static {
    move || {
        let call = counter.hit() as usize;
        let delay = delays
            .get(call - 1)
            .or_else(|| delays.last())
            .copied()
            .unwrap_or_default();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        })
    }
}
