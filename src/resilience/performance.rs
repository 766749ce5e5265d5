//! Rolling per-operation latency history.
//!
//! # Responsibilities
//! - Keep the last `HISTORY_LIMIT` attempt samples for each operation name
//! - Recompute summary statistics on every insertion
//! - Feed adaptive timeout resolution
//!
//! # Design Decisions
//! - Statistics come from successful samples only; `success_rate` uses all
//! - No stats exist for a name until it has a successful sample
//! - DashMap shard locks cover both async and worker-thread callers

use std::collections::VecDeque;
use std::time::SystemTime;

use dashmap::DashMap;
use serde::Serialize;

/// Samples retained per operation name.
pub const HISTORY_LIMIT: usize = 100;

/// Successful samples needed before p95 is computed instead of using max.
pub const P95_MIN_SAMPLES: usize = 20;

/// One finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSample {
    pub duration: f64,
    pub success: bool,
    pub timestamp: SystemTime,
}

/// Summary of an operation's successful attempts, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub p50_duration: f64,
    pub p95_duration: f64,
    pub success_rate: f64,
    /// Number of successful samples the stats were computed from.
    pub sample_count: usize,
}

impl PerformanceStats {
    /// Compute stats from a history, `None` if nothing succeeded.
    pub fn from_samples<'a>(
        samples: impl IntoIterator<Item = &'a PerformanceSample>,
    ) -> Option<Self> {
        let mut total = 0usize;
        let mut successes: Vec<f64> = Vec::new();
        for sample in samples {
            total += 1;
            if sample.success {
                successes.push(sample.duration);
            }
        }

        if successes.is_empty() {
            return None;
        }

        successes.sort_by(f64::total_cmp);
        let count = successes.len();
        let min_duration = successes[0];
        let max_duration = successes[count - 1];
        let p95_duration = if count >= P95_MIN_SAMPLES {
            successes[((count as f64 * 0.95) as usize).min(count - 1)]
        } else {
            max_duration
        };

        Some(Self {
            avg_duration: successes.iter().sum::<f64>() / count as f64,
            min_duration,
            max_duration,
            p50_duration: successes[count / 2],
            p95_duration,
            success_rate: count as f64 / total as f64,
            sample_count: count,
        })
    }
}

#[derive(Debug, Default)]
struct OperationHistory {
    samples: VecDeque<PerformanceSample>,
    stats: Option<PerformanceStats>,
}

/// Thread-safe store of attempt samples keyed by operation name.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    histories: DashMap<String, OperationHistory>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample for `name`, evicting the oldest beyond the limit.
    pub fn record(&self, name: &str, duration_secs: f64, success: bool) {
        let mut history = self.histories.entry(name.to_string()).or_default();

        history.samples.push_back(PerformanceSample {
            duration: duration_secs,
            success,
            timestamp: SystemTime::now(),
        });
        while history.samples.len() > HISTORY_LIMIT {
            history.samples.pop_front();
        }

        let stats = PerformanceStats::from_samples(&history.samples);
        history.stats = stats;
    }

    /// Latest stats for `name`.
    pub fn stats(&self, name: &str) -> Option<PerformanceStats> {
        self.histories.get(name).and_then(|h| h.stats.clone())
    }

    /// Copy of the retained samples for `name`, oldest first.
    pub fn samples(&self, name: &str) -> Vec<PerformanceSample> {
        self.histories
            .get(name)
            .map(|h| h.samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names with recorded history.
    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.histories.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Drop the history for `name`.
    pub fn reset(&self, name: &str) {
        self.histories.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded_and_keeps_newest() {
        let tracker = PerformanceTracker::new();
        for i in 0..150 {
            tracker.record("list_users", i as f64, true);
        }

        let samples = tracker.samples("list_users");
        assert_eq!(samples.len(), HISTORY_LIMIT);
        let durations: Vec<f64> = samples.iter().map(|s| s.duration).collect();
        let expected: Vec<f64> = (50..150).map(|i| i as f64).collect();
        assert_eq!(durations, expected);
    }

    #[test]
    fn test_small_history_uses_max_for_p95() {
        let tracker = PerformanceTracker::new();
        for d in [1.0, 1.2, 1.5, 1.8, 2.0] {
            tracker.record("X", d, true);
        }

        let stats = tracker.stats("X").unwrap();
        assert_eq!(stats.p95_duration, 2.0);
        assert_eq!(stats.p50_duration, 1.5);
        assert_eq!(stats.min_duration, 1.0);
        assert_eq!(stats.sample_count, 5);
        assert!((stats.avg_duration - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_p95_with_enough_samples() {
        let tracker = PerformanceTracker::new();
        // Insert out of order; stats sort, eviction does not.
        for i in (1..=40).rev() {
            tracker.record("describe", i as f64, true);
        }

        let stats = tracker.stats("describe").unwrap();
        // sorted[int(40 * 0.95)] = sorted[38] = 39.0
        assert_eq!(stats.p95_duration, 39.0);
        assert_eq!(stats.p50_duration, 21.0);
        assert_eq!(stats.max_duration, 40.0);
    }

    #[test]
    fn test_success_rate_counts_failures() {
        let tracker = PerformanceTracker::new();
        tracker.record("assign", 1.0, true);
        tracker.record("assign", 30.0, false);
        tracker.record("assign", 30.0, false);
        tracker.record("assign", 3.0, true);

        let stats = tracker.stats("assign").unwrap();
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.sample_count, 2);
        assert_eq!(stats.max_duration, 3.0);
    }

    #[test]
    fn test_no_stats_without_success() {
        let tracker = PerformanceTracker::new();
        tracker.record("broken", 5.0, false);

        assert!(tracker.stats("broken").is_none());
        assert!(tracker.stats("unknown").is_none());
        assert_eq!(tracker.samples("broken").len(), 1);

        tracker.reset("broken");
        assert!(tracker.samples("broken").is_empty());
        assert!(tracker.operation_names().is_empty());
    }
}
