//! Deadlines for blocking callers.
//!
//! # Responsibilities
//! - Run a blocking job under a wall-clock deadline
//! - Signal a slow job the moment it crosses its warning threshold
//! - Bound the number of workers left running after their deadline
//!
//! # Design Decisions
//! - `PreemptiveTimer` is the capability seam; implementations are picked once
//!   at engine construction by `detect_timer`
//! - Signal alarms are not offered: a SIGALRM handler cannot unwind out of
//!   arbitrary Rust code soundly, so the worker-thread timer is used everywhere
//! - A worker that misses its deadline is not stopped. It becomes an orphan
//!   and keeps its slot until it returns
//! - Slots are reserved before spawning, so concurrent callers cannot overshoot
//!   `max_orphaned_workers`

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TimeoutConfig;
use crate::observability::metrics;
use crate::resilience::error::EngineFailure;

/// Unit of blocking work handed to a timer.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Limits for one blocking attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadline {
    pub timeout: Duration,
    /// Flag the attempt as slow once this much time has passed.
    pub warn_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineOutcome {
    /// The job returned before the deadline.
    Completed { warned: bool },
    /// The deadline passed; the job may still be running.
    Expired { warned: bool },
}

impl DeadlineOutcome {
    pub fn warned(&self) -> bool {
        match self {
            DeadlineOutcome::Completed { warned } | DeadlineOutcome::Expired { warned } => *warned,
        }
    }
}

/// Runs blocking jobs under a deadline.
pub trait PreemptiveTimer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Run `job`, calling `on_slow` on the caller's thread as soon as
    /// `deadline.warn_after` passes while the job is still running.
    fn run_with_deadline(
        &self,
        job: Job,
        deadline: Deadline,
        on_slow: &dyn Fn(),
    ) -> Result<DeadlineOutcome, EngineFailure>;
}

/// Pick the timer for this platform.
pub fn detect_timer(config: &TimeoutConfig) -> Arc<dyn PreemptiveTimer> {
    let timer = WorkerThreadTimer::new(config.max_orphaned_workers);
    tracing::debug!(
        timer = timer.name(),
        max_orphaned_workers = timer.max_orphans,
        "Selected synchronous timer"
    );
    Arc::new(timer)
}

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Runs each job on a dedicated thread and waits for it with a timeout.
///
/// Each worker holds one of `max_orphans` slots from spawn until its job
/// returns. Any running worker may still miss its deadline, so holding the
/// slot for the whole run is what keeps orphans within the cap.
#[derive(Debug)]
pub struct WorkerThreadTimer {
    max_orphans: usize,
    slots: Arc<AtomicUsize>,
    orphans: Arc<AtomicUsize>,
}

impl WorkerThreadTimer {
    /// A cap of zero is raised to one.
    pub fn new(max_orphans: usize) -> Self {
        Self {
            max_orphans: max_orphans.max(1),
            slots: Arc::new(AtomicUsize::new(0)),
            orphans: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Workers still running past their deadline.
    pub fn orphaned(&self) -> usize {
        self.orphans.load(Ordering::Acquire)
    }

    /// Workers whose job has not returned yet, orphans included.
    pub fn in_flight(&self) -> usize {
        self.slots.load(Ordering::Acquire)
    }

    fn reserve_slot(&self) -> Result<(), EngineFailure> {
        let limit = self.max_orphans;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < limit).then_some(taken + 1)
            })
            .map(|_| ())
            .map_err(|running| {
                tracing::warn!(
                    running,
                    orphaned = self.orphaned(),
                    limit,
                    "Refusing blocking job: worker slots exhausted"
                );
                EngineFailure::OrphanLimitReached { running, limit }
            })
    }
}

/// Hands a worker's slot back when its job returns or unwinds.
struct WorkerExit {
    state: Arc<AtomicU8>,
    slots: Arc<AtomicUsize>,
    orphans: Arc<AtomicUsize>,
    done: mpsc::Sender<()>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        let abandoned = self
            .state
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_err();
        if abandoned {
            let left = self.orphans.fetch_sub(1, Ordering::AcqRel) - 1;
            metrics::record_orphan_returned();
            tracing::debug!(orphaned = left, "Orphaned worker finished");
        }
        // Free the slot before signalling so the caller sees it released.
        self.slots.fetch_sub(1, Ordering::AcqRel);
        let _ = self.done.send(());
    }
}

impl PreemptiveTimer for WorkerThreadTimer {
    fn name(&self) -> &'static str {
        "worker_thread"
    }

    fn run_with_deadline(
        &self,
        job: Job,
        deadline: Deadline,
        on_slow: &dyn Fn(),
    ) -> Result<DeadlineOutcome, EngineFailure> {
        self.reserve_slot()?;

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let state = Arc::new(AtomicU8::new(RUNNING));
        let exit = WorkerExit {
            state: Arc::clone(&state),
            slots: Arc::clone(&self.slots),
            orphans: Arc::clone(&self.orphans),
            done: done_tx,
        };

        let spawned = thread::Builder::new()
            .name("resilience-worker".to_string())
            .spawn(move || {
                let _exit = exit;
                job();
            });
        if let Err(e) = spawned {
            // The closure, and with it the exit guard, was dropped unrun.
            return Err(EngineFailure::SpawnFailed(e.to_string()));
        }

        let started = Instant::now();
        let mut warned = false;

        if let Some(warn_after) = deadline.warn_after.filter(|w| *w < deadline.timeout) {
            match done_rx.recv_timeout(warn_after) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    return Ok(DeadlineOutcome::Completed { warned });
                }
                Err(RecvTimeoutError::Timeout) => {
                    warned = true;
                    on_slow();
                }
            }
        }

        let remaining = deadline.timeout.saturating_sub(started.elapsed());
        match done_rx.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                Ok(DeadlineOutcome::Completed { warned })
            }
            Err(RecvTimeoutError::Timeout) => {
                let orphaned = self.orphans.fetch_add(1, Ordering::AcqRel) + 1;
                metrics::record_orphan_started();
                if state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::debug!(orphaned, "Worker left running past its deadline");
                    Ok(DeadlineOutcome::Expired { warned })
                } else {
                    // Finished between the timeout and the state change.
                    self.orphans.fetch_sub(1, Ordering::AcqRel);
                    metrics::record_orphan_returned();
                    Ok(DeadlineOutcome::Completed { warned })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;

    fn deadline(ms: u64) -> Deadline {
        Deadline {
            timeout: Duration::from_millis(ms),
            warn_after: None,
        }
    }

    fn sleeper(ms: u64) -> Job {
        Box::new(move || thread::sleep(Duration::from_millis(ms)))
    }

    #[test]
    fn test_job_completes_in_time() {
        let timer = WorkerThreadTimer::new(4);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let outcome = timer
            .run_with_deadline(
                Box::new(move || flag.store(true, Ordering::SeqCst)),
                deadline(1_000),
                &|| {},
            )
            .unwrap();

        assert_eq!(outcome, DeadlineOutcome::Completed { warned: false });
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(timer.orphaned(), 0);
        assert_eq!(timer.in_flight(), 0);
    }

    #[test]
    fn test_expired_job_is_orphaned_until_it_returns() {
        let timer = WorkerThreadTimer::new(4);
        let outcome = timer.run_with_deadline(sleeper(300), deadline(20), &|| {}).unwrap();

        assert_eq!(outcome, DeadlineOutcome::Expired { warned: false });
        assert_eq!(timer.orphaned(), 1);
        assert_eq!(timer.in_flight(), 1);

        thread::sleep(Duration::from_millis(600));
        assert_eq!(timer.orphaned(), 0);
        assert_eq!(timer.in_flight(), 0);
    }

    #[test]
    fn test_orphan_limit_refuses_new_jobs() {
        let timer = WorkerThreadTimer::new(1);
        timer.run_with_deadline(sleeper(400), deadline(10), &|| {}).unwrap();

        let refused = timer.run_with_deadline(Box::new(|| {}), deadline(100), &|| {});
        assert!(matches!(
            refused,
            Err(EngineFailure::OrphanLimitReached { running: 1, limit: 1 })
        ));
    }

    #[test]
    fn test_concurrent_callers_cannot_exceed_orphan_limit() {
        const CALLERS: usize = 8;
        let timer = Arc::new(WorkerThreadTimer::new(1));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let timer = Arc::clone(&timer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let outcome = timer.run_with_deadline(sleeper(800), deadline(50), &|| {});
                    (outcome, timer.orphaned())
                })
            })
            .collect();

        let mut expired = 0;
        let mut refused = 0;
        for handle in handles {
            let (outcome, orphaned_seen) = handle.join().unwrap();
            assert!(orphaned_seen <= 1, "saw {orphaned_seen} orphans with a cap of 1");
            match outcome {
                Ok(DeadlineOutcome::Expired { .. }) => expired += 1,
                Err(EngineFailure::OrphanLimitReached { limit: 1, .. }) => refused += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert!(expired <= 1);
        assert_eq!(expired + refused, CALLERS);
        assert!(timer.orphaned() <= 1);

        thread::sleep(Duration::from_millis(1_200));
        assert_eq!(timer.orphaned(), 0);
        assert_eq!(timer.in_flight(), 0);
    }

    #[test]
    fn test_slow_hook_fires_at_threshold() {
        let timer = WorkerThreadTimer::new(4);
        let started = Instant::now();
        let fired_at = Cell::new(None);

        let outcome = timer
            .run_with_deadline(
                sleeper(600),
                Deadline {
                    timeout: Duration::from_secs(2),
                    warn_after: Some(Duration::from_millis(100)),
                },
                &|| fired_at.set(Some(started.elapsed())),
            )
            .unwrap();

        assert_eq!(outcome, DeadlineOutcome::Completed { warned: true });
        assert!(outcome.warned());
        let fired_at = fired_at.get().expect("slow hook fired");
        assert!(fired_at >= Duration::from_millis(100));
        assert!(fired_at < Duration::from_millis(450), "fired at {fired_at:?}");
    }

    #[test]
    fn test_fast_job_never_fires_slow_hook() {
        let timer = WorkerThreadTimer::new(4);
        let fired = Cell::new(false);

        let outcome = timer
            .run_with_deadline(
                Box::new(|| {}),
                Deadline {
                    timeout: Duration::from_secs(1),
                    warn_after: Some(Duration::from_millis(500)),
                },
                &|| fired.set(true),
            )
            .unwrap();

        assert_eq!(outcome, DeadlineOutcome::Completed { warned: false });
        assert!(!fired.get());
    }

    #[test]
    fn test_zero_cap_is_raised_to_one() {
        let timer = WorkerThreadTimer::new(0);
        let outcome = timer.run_with_deadline(Box::new(|| {}), deadline(1_000), &|| {});
        assert_eq!(outcome.unwrap(), DeadlineOutcome::Completed { warned: false });
    }

    #[test]
    fn test_panicking_job_releases_its_slot() {
        let timer = WorkerThreadTimer::new(1);
        let job: Job = Box::new(|| panic!("job failed"));
        let outcome = timer.run_with_deadline(job, deadline(1_000), &|| {});

        assert_eq!(outcome.unwrap(), DeadlineOutcome::Completed { warned: false });
        assert_eq!(timer.in_flight(), 0);
        assert!(timer.run_with_deadline(Box::new(|| {}), deadline(1_000), &|| {}).is_ok());
    }
}
