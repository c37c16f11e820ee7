//! Fill-rate estimator: signed consumption rate in GB/minute from the last
//! two free-space samples.
//!
//! Deliberately a two-point estimator, not a smoothed series: the control
//! loop's own cadence already adapts to pressure, and the rate only gates
//! escalation, so reacting within one interval beats converging smoothly.
//! Uses the monotonic clock; wall time is only used for persisted samples.

#![allow(missing_docs)]

use std::time::Instant;

use crate::monitor::sampler::BYTES_PER_GB;

#[derive(Debug, Clone, Copy)]
struct LastSample {
    free_bytes: u64,
    at: Instant,
}

/// Two-point fill-rate estimator with a noise floor.
#[derive(Debug, Clone)]
pub struct FillRateEstimator {
    /// Rates below this (GB/min) report as 0 to suppress noise.
    warn_floor_gb_per_min: u64,
    last: Option<LastSample>,
}

impl FillRateEstimator {
    #[must_use]
    pub const fn new(warn_floor_gb_per_min: u64) -> Self {
        Self {
            warn_floor_gb_per_min,
            last: None,
        }
    }

    /// Update the floor at runtime (config reload).
    pub fn set_warn_floor(&mut self, warn_floor_gb_per_min: u64) {
        self.warn_floor_gb_per_min = warn_floor_gb_per_min;
    }

    /// Observe a new sample and return the fill rate in whole GB/minute.
    ///
    /// Reports 0 when free space did not decrease, when no time elapsed,
    /// or when the rate is below the warning floor. The stored sample is
    /// always updated, including on the zero paths.
    pub fn observe(&mut self, free_bytes: u64, now: Instant) -> u64 {
        let previous = self.last.replace(LastSample {
            free_bytes,
            at: now,
        });
        let Some(previous) = previous else {
            return 0;
        };

        let Some(elapsed) = now.checked_duration_since(previous.at) else {
            // Out-of-order observation; fail safe.
            return 0;
        };
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 || free_bytes >= previous.free_bytes {
            return 0;
        }

        #[allow(clippy::cast_precision_loss)]
        let consumed = (previous.free_bytes - free_bytes) as f64;
        #[allow(clippy::cast_precision_loss)]
        let gb_per_min = (consumed / secs) * 60.0 / BYTES_PER_GB as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let truncated = gb_per_min as u64;

        if truncated < self.warn_floor_gb_per_min {
            0
        } else {
            truncated
        }
    }

    /// Most recent stored sample, if any.
    #[must_use]
    pub fn last_free_bytes(&self) -> Option<u64> {
        self.last.map(|s| s.free_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const GB: u64 = BYTES_PER_GB;

    #[test]
    fn first_observation_reports_zero() {
        let mut est = FillRateEstimator::new(2);
        assert_eq!(est.observe(100 * GB, Instant::now()), 0);
    }

    #[test]
    fn steady_consumption_yields_gb_per_minute() {
        let mut est = FillRateEstimator::new(2);
        let t0 = Instant::now();
        est.observe(100 * GB, t0);
        // 10 GB gone in 60 s → 10 GB/min.
        let rate = est.observe(90 * GB, t0 + Duration::from_secs(60));
        assert_eq!(rate, 10);
    }

    #[test]
    fn growth_reports_zero_but_updates_sample() {
        let mut est = FillRateEstimator::new(2);
        let t0 = Instant::now();
        est.observe(50 * GB, t0);
        assert_eq!(est.observe(60 * GB, t0 + Duration::from_secs(10)), 0);
        assert_eq!(est.last_free_bytes(), Some(60 * GB));
        // The next decrease measures against the *updated* sample.
        let rate = est.observe(50 * GB, t0 + Duration::from_secs(70));
        assert_eq!(rate, 10);
    }

    #[test]
    fn zero_elapsed_reports_zero() {
        let mut est = FillRateEstimator::new(2);
        let t0 = Instant::now();
        est.observe(50 * GB, t0);
        assert_eq!(est.observe(40 * GB, t0), 0);
    }

    #[test]
    fn out_of_order_timestamp_reports_zero_without_panicking() {
        let mut est = FillRateEstimator::new(2);
        let t0 = Instant::now();
        est.observe(50 * GB, t0 + Duration::from_secs(10));
        assert_eq!(est.observe(40 * GB, t0), 0);
    }

    #[test]
    fn below_floor_is_suppressed() {
        let mut est = FillRateEstimator::new(2);
        let t0 = Instant::now();
        est.observe(100 * GB, t0);
        // 1 GB/min < floor of 2.
        assert_eq!(est.observe(99 * GB, t0 + Duration::from_secs(60)), 0);
    }

    #[test]
    fn at_floor_is_reported() {
        let mut est = FillRateEstimator::new(2);
        let t0 = Instant::now();
        est.observe(100 * GB, t0);
        assert_eq!(est.observe(98 * GB, t0 + Duration::from_secs(60)), 2);
    }

    #[test]
    fn fractional_rate_truncates() {
        let mut est = FillRateEstimator::new(1);
        let t0 = Instant::now();
        est.observe(100 * GB, t0);
        // 5 GB in 120 s → 2.5 GB/min → 2.
        assert_eq!(est.observe(95 * GB, t0 + Duration::from_secs(120)), 2);
    }

    #[test]
    fn zero_floor_reports_any_positive_rate() {
        let mut est = FillRateEstimator::new(0);
        let t0 = Instant::now();
        est.observe(100 * GB, t0);
        // ~0.5 GB/min truncates to 0 even with no floor.
        assert_eq!(est.observe(100 * GB - GB / 2, t0 + Duration::from_secs(60)), 0);
        let rate = est.observe(96 * GB, t0 + Duration::from_secs(120));
        assert!(rate >= 3, "3.5 GB/min truncates to 3, got {rate}");
    }
}
