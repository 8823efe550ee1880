use std::sync::atomic::{AtomicI64, Ordering};

use super::estimator::LatencyEstimator;

/// Sample fraction scaling factor — F is stored as an integer in
/// `[0, FRACTION_SCALE]` rather than a float, matching the original's
/// `sampleFraction int64` representation (spec.md §3, §9).
const FRACTION_SCALE: i64 = 10_000;

/// Adaptive admission controller implementing spec.md §4.2.
///
/// `F` (sample fraction) and `C` (window counter) are independent atomics —
/// there is no cross-field invariant that requires them to move together,
/// so no lock is needed to keep them consistent with each other.
pub struct AdmissionController {
    fraction_scaled: AtomicI64,
    counter: AtomicI64,
    sample_size: i64,
    f_min_scaled: i64,
    pub estimator: LatencyEstimator,
}

impl AdmissionController {
    pub fn new(sample_size: u32, f_min: f64) -> Self {
        Self {
            fraction_scaled: AtomicI64::new(FRACTION_SCALE),
            counter: AtomicI64::new(0),
            sample_size: sample_size as i64,
            f_min_scaled: (f_min * FRACTION_SCALE as f64) as i64,
            estimator: LatencyEstimator::new(),
        }
    }

    /// Current sample fraction F, in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        self.fraction_scaled.load(Ordering::Acquire) as f64 / FRACTION_SCALE as f64
    }

    /// F_min, for the health-check comparison in spec.md §4.7/§6.
    pub fn f_min(&self) -> f64 {
        self.f_min_scaled as f64 / FRACTION_SCALE as f64
    }

    /// Decide whether to admit a request, per spec.md §4.2's algorithm:
    ///
    /// 1. At F = 1.0, always admit without touching the counter (fast path —
    ///    the common case at full capacity skips the atomic increment).
    /// 2. Otherwise increment C, obtaining its post-increment value `c`.
    /// 3. If `c >= S`, the sample window has filled: reset C to 0 and deny
    ///    this request (it falls just past the window boundary).
    /// 4. Else admit iff `c <= floor(F * S)`.
    pub fn admit(&self) -> bool {
        let f = self.fraction_scaled.load(Ordering::Acquire);
        if f >= FRACTION_SCALE {
            return true;
        }

        let c = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        if c >= self.sample_size {
            self.counter.store(0, Ordering::Release);
            return false;
        }

        let allowed = (f * self.sample_size) / FRACTION_SCALE;
        c <= allowed
    }

    /// One control-loop tick: nudge F towards 1.0 when L is under target,
    /// away from it when over, clamped to `[F_min, 1.0]` (spec.md §4.2).
    pub fn tick(&self, latency_target_ns: i64, delta_inc: f64, delta_dec: f64) {
        let l = self.estimator.read().as_nanos() as i64;

        loop {
            let current = self.fraction_scaled.load(Ordering::Acquire);
            let current_f = current as f64 / FRACTION_SCALE as f64;

            let next_f = if l <= latency_target_ns {
                (current_f + delta_inc).min(1.0)
            } else {
                (current_f - delta_dec).max(self.f_min_scaled as f64 / FRACTION_SCALE as f64)
            };
            let next = (next_f * FRACTION_SCALE as f64) as i64;

            if self
                .fraction_scaled
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }

    #[cfg(test)]
    pub fn set_fraction_for_test(&self, f: f64) {
        self.fraction_scaled
            .store((f * FRACTION_SCALE as f64) as i64, Ordering::Release);
    }

    /// Stall detector: if F is below 1.0 (i.e. currently shedding at all)
    /// and no response has been recorded for longer than
    /// `idle_threshold_secs`, reset F to 0.5 and L to 0 so that a resumed
    /// burst of traffic isn't shed based on a stale saturated estimate
    /// (spec.md §4.2, taken from the Go `main()` stats-printer goroutine).
    /// A healthy instance at F=1.0 is left alone — an idle gap there isn't
    /// a stale oversaturated estimate, and slamming it down to 0.5 would
    /// manufacture the exact shedding the detector exists to prevent.
    pub fn check_stall(&self, idle_threshold_secs: i64) {
        if self.fraction() < 1.0 && self.estimator.idle_secs() > idle_threshold_secs {
            self.fraction_scaled
                .store(FRACTION_SCALE / 2, Ordering::Release);
            self.estimator.reset();
        }
    }
}
