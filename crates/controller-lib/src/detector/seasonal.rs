//! Hour-of-day seasonal baseline
//!
//! Learns a per-hour mean/stddev for each metric so that a value which is
//! normal at peak hours is not flagged just because it exceeds the global
//! baseline. Buckets update incrementally with Welford's algorithm and are
//! never reset except through an explicit detector reset.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Minimum observations an hour bucket needs before it can vote
pub const DEFAULT_MIN_BUCKET_SAMPLES: u64 = 5;

/// One hour-of-day baseline bucket
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HourBucket {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared differences for Welford's algorithm
    m2: f64,
}

impl HourBucket {
    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

/// Per-metric map from hour-of-day to learned baseline
#[derive(Debug, Clone)]
pub struct SeasonalProfile {
    buckets: [HourBucket; 24],
    min_bucket_samples: u64,
}

impl SeasonalProfile {
    pub fn new(min_bucket_samples: u64) -> Self {
        Self {
            buckets: [HourBucket::default(); 24],
            min_bucket_samples,
        }
    }

    /// Fold a sample into the bucket for its hour of day
    pub fn observe(&mut self, timestamp: DateTime<Utc>, value: f64) {
        let hour = timestamp.hour() as usize;
        self.buckets[hour].update(value);
    }

    /// Baseline for the given instant, if its bucket has seen enough samples
    pub fn baseline_for(&self, timestamp: DateTime<Utc>) -> Option<&HourBucket> {
        let bucket = &self.buckets[timestamp.hour() as usize];
        (bucket.count >= self.min_bucket_samples).then_some(bucket)
    }

    pub fn bucket(&self, hour: usize) -> Option<&HourBucket> {
        self.buckets.get(hour)
    }
}

impl Default for SeasonalProfile {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BUCKET_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 15, 0).unwrap()
    }

    #[test]
    fn test_bucket_needs_minimum_samples() {
        let mut profile = SeasonalProfile::new(5);
        for _ in 0..4 {
            profile.observe(at_hour(9), 100.0);
        }
        assert!(profile.baseline_for(at_hour(9)).is_none());

        profile.observe(at_hour(9), 100.0);
        let bucket = profile.baseline_for(at_hour(9)).unwrap();
        assert_eq!(bucket.count, 5);
        assert!((bucket.mean - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_hours_are_independent() {
        let mut profile = SeasonalProfile::new(1);
        profile.observe(at_hour(2), 10.0);
        profile.observe(at_hour(14), 500.0);

        assert!((profile.baseline_for(at_hour(2)).unwrap().mean - 10.0).abs() < 1e-9);
        assert!((profile.baseline_for(at_hour(14)).unwrap().mean - 500.0).abs() < 1e-9);
        assert!(profile.baseline_for(at_hour(3)).is_none());
    }

    #[test]
    fn test_welford_std_dev() {
        let mut profile = SeasonalProfile::new(1);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            profile.observe(at_hour(6), v);
        }
        let bucket = profile.baseline_for(at_hour(6)).unwrap();
        assert!((bucket.mean - 5.0).abs() < 1e-9);
        // Sample stddev of the classic Welford example set
        assert!((bucket.std_dev() - 2.138).abs() < 0.01);
    }
}
