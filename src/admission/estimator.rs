use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// α — EMA smoothing factor (spec.md §4.1).
const EMA_ALPHA: f64 = 0.1;

/// Exponentially-weighted moving average of observed upstream latencies.
///
/// `L` is stored as an integer nanosecond count in an `AtomicI64`, updated
/// via a compare-and-swap retry loop — no locking, wait-free per attempt.
/// `T_last`, the wall-clock second of the most recent observation, is
/// updated separately and does not need to be consistent with `L`: readers
/// may see an older `T_last` alongside a newer `L` (spec.md §5).
pub struct LatencyEstimator {
    ema_latency_ns: AtomicI64,
    last_response_unix_secs: AtomicI64,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self {
            ema_latency_ns: AtomicI64::new(0),
            last_response_unix_secs: AtomicI64::new(now_unix_secs()),
        }
    }

    /// Record a completed upstream request's duration and fold it into the
    /// EMA. Also stamps `T_last` to now.
    pub fn observe(&self, d: Duration) {
        let new_ns = d.as_nanos().min(i64::MAX as u128) as i64;

        loop {
            let current = self.ema_latency_ns.load(Ordering::Acquire);
            let updated = (current as f64 * (1.0 - EMA_ALPHA) + new_ns as f64 * EMA_ALPHA) as i64;

            if self
                .ema_latency_ns
                .compare_exchange(current, updated, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        self.last_response_unix_secs
            .store(now_unix_secs(), Ordering::Release);
    }

    /// Current EMA latency.
    pub fn read(&self) -> Duration {
        let ns = self.ema_latency_ns.load(Ordering::Acquire).max(0);
        Duration::from_nanos(ns as u64)
    }

    /// Seconds elapsed since the last recorded observation.
    pub fn idle_secs(&self) -> i64 {
        now_unix_secs() - self.last_response_unix_secs.load(Ordering::Acquire)
    }

    /// Reset L to zero and T_last to now — used by the stall detector so a
    /// resumed traffic burst does not inherit a stale, oversaturated
    /// latency estimate (spec.md §4.2).
    pub fn reset(&self) {
        self.ema_latency_ns.store(0, Ordering::Release);
        self.last_response_unix_secs
            .store(now_unix_secs(), Ordering::Release);
    }
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_latency_is_zero() {
        let est = LatencyEstimator::new();
        assert_eq!(est.read(), Duration::ZERO);
    }

    #[test]
    fn test_ema_converges_monotonically_under_constant_input() {
        let est = LatencyEstimator::new();
        let target = Duration::from_millis(100);

        let mut prev_diff = i128::MAX;
        for _ in 0..200 {
            est.observe(target);
            let diff = (est.read().as_nanos() as i128 - target.as_nanos() as i128).abs();
            assert!(diff <= prev_diff, "EMA distance to target must not increase");
            prev_diff = diff;
        }
        // After many iterations of the same input, L should be very close to d.
        let final_diff_ms = (est.read().as_millis() as i64 - target.as_millis() as i64).abs();
        assert!(final_diff_ms <= 1, "final diff was {final_diff_ms}ms");
    }

    #[test]
    fn test_reset_zeroes_latency_and_refreshes_idle_clock() {
        let est = LatencyEstimator::new();
        est.observe(Duration::from_secs(1));
        assert!(est.read() > Duration::ZERO);

        est.reset();
        assert_eq!(est.read(), Duration::ZERO);
        assert!(est.idle_secs() <= 1);
    }

    #[test]
    fn test_idle_secs_starts_near_zero() {
        let est = LatencyEstimator::new();
        assert!(est.idle_secs() <= 1);
    }
}
