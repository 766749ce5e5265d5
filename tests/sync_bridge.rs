//! Blocking-path behaviour. Uses real, short sleeps.

mod common;

use std::fmt;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use common::{config, engine, CallCounter, TestError};
use resilience_engine::resilience::sync_bridge::Job;
use resilience_engine::resilience::{
    Deadline, DeadlineOutcome, EngineFailure, ErrorCategory, PreemptiveTimer, WorkerThreadTimer,
};
use resilience_engine::{ExecuteOptions, Strategy, TimeoutEngine};

/// Runs the job on the caller's thread and never expires it.
#[derive(Debug)]
struct InlineTimer;

impl PreemptiveTimer for InlineTimer {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run_with_deadline(
        &self,
        job: Job,
        _deadline: Deadline,
        _on_slow: &dyn Fn(),
    ) -> Result<DeadlineOutcome, EngineFailure> {
        job();
        Ok(DeadlineOutcome::Completed { warned: false })
    }
}

#[test]
fn test_sync_success() {
    let engine = engine(Strategy::FailFast, 1.0);

    let result = engine.execute_sync(|| Ok::<_, TestError>(42), "answer", None, None);

    assert!(result.success);
    assert_eq!(result.result, Some(42));
    assert_eq!(result.retry_count, 0);
    assert!(engine.get_active_operations().is_empty());
    assert_eq!(engine.get_operation_stats("answer").map(|s| s.sample_count), Some(1));
}

#[test]
fn test_sync_timeout_returns_without_waiting_for_worker() {
    let engine = engine(Strategy::FailFast, 0.05);

    let result = engine.execute_sync(
        || {
            thread::sleep(Duration::from_millis(400));
            Ok::<_, TestError>(())
        },
        "blocking_io",
        None,
        None,
    );

    assert!(!result.success);
    assert!(result.timeout_occurred);
    assert!(result.duration_secs < 0.35, "duration {}", result.duration_secs);
    assert_eq!(
        result.error.map(|e| e.category),
        Some(ErrorCategory::Timeout)
    );
}

#[test]
fn test_sync_error_keeps_cause() {
    let engine = engine(Strategy::RetryWithBackoff, 1.0);
    let calls = CallCounter::default();
    let counter = calls.clone();

    let result = engine.execute_sync(
        move || {
            counter.hit();
            Err::<(), _>(TestError::Throttled)
        },
        "throttled",
        None,
        None,
    );

    assert!(!result.success);
    assert!(!result.timeout_occurred);
    assert_eq!(calls.count(), 1);
    let error = result.error.expect("error");
    assert!(matches!(error.cause_as::<TestError>(), Some(TestError::Throttled)));
}

#[test]
fn test_sync_panic_is_captured() {
    let engine = engine(Strategy::FailFast, 1.0);

    let result = engine.execute_sync(
        || -> Result<u32, TestError> { panic!("worker blew up") },
        "panicky",
        None,
        None,
    );

    assert!(!result.success);
    assert!(matches!(
        result.error.as_ref().and_then(|e| e.cause_as::<EngineFailure>()),
        Some(EngineFailure::Panicked { message }) if message == "worker blew up"
    ));
}

#[test]
fn test_sync_retry_recovers() {
    let engine = TimeoutEngine::new(resilience_engine::TimeoutConfig {
        max_backoff_secs: 0.01,
        ..config(Strategy::RetryWithBackoff, 0.1)
    });
    let calls = CallCounter::default();
    let counter = calls.clone();

    let result = engine.execute_sync(
        move || {
            if counter.hit() == 1 {
                thread::sleep(Duration::from_millis(300));
            }
            Ok::<_, TestError>("recovered")
        },
        "flaky_disk",
        None,
        None,
    );

    assert!(result.success);
    assert_eq!(result.result, Some("recovered"));
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.final_timeout_used, 0.2);
    assert_eq!(calls.count(), 2);
}

#[test]
fn test_orphan_limit_refuses_then_recovers() {
    let engine = engine(Strategy::FailFast, 0.05).with_timer(WorkerThreadTimer::new(1));

    let first = engine.execute_sync(
        || {
            thread::sleep(Duration::from_millis(400));
            Ok::<_, TestError>(1)
        },
        "hog",
        None,
        None,
    );
    assert!(first.timeout_occurred);

    let calls = CallCounter::default();
    let counter = calls.clone();
    let refused = engine.execute_sync(
        move || {
            counter.hit();
            Ok::<_, TestError>(2)
        },
        "quick",
        None,
        None,
    );
    assert!(!refused.success);
    assert!(!refused.timeout_occurred);
    assert_eq!(calls.count(), 0);
    let error = refused.error.expect("refusal");
    assert_eq!(error.category, ErrorCategory::ResourceExhausted);
    assert!(matches!(
        error.cause_as::<EngineFailure>(),
        Some(EngineFailure::OrphanLimitReached { running: 1, limit: 1 })
    ));

    // Once the orphan returns its slot is released.
    thread::sleep(Duration::from_millis(700));
    let recovered = engine.execute_sync(|| Ok::<_, TestError>(3), "quick", Some(1.0), None);
    assert!(recovered.success);
}

#[test]
fn test_sync_slow_attempt_is_warned() {
    let engine = TimeoutEngine::new(resilience_engine::TimeoutConfig {
        warning_threshold_ratio: 0.2,
        ..config(Strategy::FailFast, 1.0)
    });

    let result = engine.execute_sync(
        || {
            thread::sleep(Duration::from_millis(400));
            Ok::<_, TestError>(())
        },
        "sluggish",
        None,
        None,
    );

    assert!(result.success);
    assert_eq!(result.warnings.len(), 1);
}

/// Records when each "running long" warning is logged.
#[derive(Clone, Default)]
struct SlowWarningTimes(Arc<Mutex<Vec<Instant>>>);

#[derive(Default)]
struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for SlowWarningTimes {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageField::default();
        event.record(&mut message);
        if message.0 == "Operation is running long" {
            self.0.lock().unwrap().push(Instant::now());
        }
    }
}

#[test]
fn test_sync_slow_warning_logged_at_threshold() {
    let engine = TimeoutEngine::new(resilience_engine::TimeoutConfig {
        warning_threshold_ratio: 0.2,
        ..config(Strategy::FailFast, 2.0)
    });
    let times = SlowWarningTimes::default();
    let subscriber = tracing_subscriber::registry().with(times.clone());

    let started = Instant::now();
    let result = tracing::subscriber::with_default(subscriber, || {
        engine.execute_sync(
            || {
                thread::sleep(Duration::from_millis(1_200));
                Ok::<_, TestError>(())
            },
            "nightly_export",
            None,
            None,
        )
    });

    assert!(result.success);
    assert_eq!(result.warnings.len(), 1);

    let logged = times.0.lock().unwrap();
    assert_eq!(logged.len(), 1);
    let at = logged[0].duration_since(started);
    // Threshold is 0.4s; the attempt itself takes 1.2s.
    assert!(at >= Duration::from_millis(400), "logged at {at:?}");
    assert!(at < Duration::from_millis(900), "logged at {at:?}");
}

#[test]
fn test_concurrent_callers_respect_orphan_limit() {
    const CALLERS: usize = 8;
    let engine = Arc::new(engine(Strategy::FailFast, 0.05).with_timer(WorkerThreadTimer::new(1)));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.execute_sync(
                    || {
                        thread::sleep(Duration::from_millis(800));
                        Ok::<_, TestError>(())
                    },
                    "bulk_import",
                    None,
                    None,
                )
            })
        })
        .collect();

    let mut timed_out = 0;
    let mut refused = 0;
    for handle in handles {
        let result = handle.join().unwrap();
        assert!(!result.success);
        if result.timeout_occurred {
            timed_out += 1;
        } else {
            let error = result.error.expect("refusal");
            assert_eq!(error.category, ErrorCategory::ResourceExhausted);
            refused += 1;
        }
    }

    // Each timed-out attempt leaves an orphan behind.
    assert!(timed_out <= 1, "{timed_out} orphans with a cap of 1");
    assert_eq!(timed_out + refused, CALLERS);
}

#[test]
fn test_zero_orphan_budget_still_runs_jobs() {
    let engine = TimeoutEngine::new(resilience_engine::TimeoutConfig {
        max_orphaned_workers: 0,
        ..config(Strategy::FailFast, 1.0)
    });

    let result = engine.execute_sync(|| Ok::<_, TestError>("ran"), "tiny", None, None);
    assert!(result.success);
}

#[test]
fn test_custom_timer_is_used() {
    let engine = engine(Strategy::FailFast, 0.01).with_timer(InlineTimer);

    // Would time out on a worker thread; the inline timer never expires.
    let result = engine.execute_sync_with(
        || {
            thread::sleep(Duration::from_millis(50));
            Ok::<_, TestError>("inline")
        },
        "inline_job",
        ExecuteOptions::default(),
    );

    assert!(result.success);
    assert_eq!(result.result, Some("inline"));
}

#[tokio::test]
async fn test_sync_path_from_async_runtime() {
    let engine = Arc::new(engine(Strategy::FailFast, 1.0));

    let worker = Arc::clone(&engine);
    let result = tokio::task::spawn_blocking(move || {
        worker.execute_sync(|| Ok::<_, TestError>("from blocking pool"), "bridged", None, None)
    })
    .await
    .expect("blocking task");

    assert!(result.success);
    assert!(engine.get_operation_stats("bridged").is_some());
}
