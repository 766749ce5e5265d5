//! Geometric backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use crate::resilience::timeouts::secs_to_duration;

/// Delay before retrying after attempt `attempt` (zero-based) timed out.
///
/// `min(multiplier^attempt, max_secs)` seconds, plus 0-10% jitter when asked.
pub fn calculate_backoff(attempt: u32, multiplier: f64, max_secs: f64, jitter: bool) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let capped_secs = multiplier.powi(exponent).min(max_secs).max(0.0);
    let delay = secs_to_duration(capped_secs);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = delay.as_millis() as u64 / 10;
    if jitter && jitter_range > 0 {
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_range))
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0, 2.0, 60.0, false), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1, 2.0, 60.0, false), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, 2.0, 60.0, false), Duration::from_secs(8));

        let max = calculate_backoff(10, 2.0, 5.0, false);
        assert_eq!(max, Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..50 {
            let d = calculate_backoff(2, 2.0, 60.0, true);
            assert!(d >= Duration::from_secs(4));
            assert!(d < Duration::from_millis(4400));
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        assert_eq!(calculate_backoff(u32::MAX, 2.0, 30.0, false), Duration::from_secs(30));
    }
}
