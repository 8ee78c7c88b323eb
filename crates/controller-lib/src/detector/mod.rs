//! Anomaly detection ensemble
//!
//! This module ingests a time-ordered stream of samples per metric and emits
//! findings scored by five independent methods:
//! - Adaptive z-score against the rolling window
//! - EMA deviation for gradual drift
//! - IQR fence for outlier robustness
//! - Seasonal deviation against the hour-of-day baseline
//! - Rolling-window shift for abrupt level changes
//!
//! Each method votes in [0, 1]; the finding confidence is the weighted sum of
//! the votes of the methods that fired.

mod seasonal;
mod window;

pub use seasonal::{HourBucket, SeasonalProfile, DEFAULT_MIN_BUCKET_SAMPLES};
pub use window::{MetricWindow, WindowStats, DEFAULT_EMA_ALPHA, DEFAULT_WINDOW_CAPACITY};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Finding, MethodId, Sample, Severity};

/// Minimum samples required per metric before any finding is emitted
pub const DEFAULT_MIN_SAMPLES: usize = 10;

/// Default emission floor on ensemble confidence
pub const DEFAULT_EMISSION_FLOOR: f64 = 0.3;

/// Base deviation threshold at sensitivity 1.0, in standard deviations
const BASE_THRESHOLD_SIGMA: f64 = 3.0;

/// Tolerance when validating that method weights sum to 1.0
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("method weights must sum to 1.0, got {sum}")]
    InvalidWeights { sum: f64 },
    #[error("invalid detector config: {0}")]
    InvalidConfig(String),
}

/// Per-method ensemble weights; must sum to 1.0
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MethodWeights {
    #[serde(default = "default_weight_z_score")]
    pub z_score: f64,
    #[serde(default = "default_weight_ema")]
    pub ema_deviation: f64,
    #[serde(default = "default_weight_iqr")]
    pub iqr_outlier: f64,
    #[serde(default = "default_weight_seasonal")]
    pub seasonal: f64,
    #[serde(default = "default_weight_shift")]
    pub rolling_shift: f64,
}

fn default_weight_z_score() -> f64 {
    0.25
}
fn default_weight_ema() -> f64 {
    0.20
}
fn default_weight_iqr() -> f64 {
    0.20
}
fn default_weight_seasonal() -> f64 {
    0.15
}
fn default_weight_shift() -> f64 {
    0.20
}

impl Default for MethodWeights {
    fn default() -> Self {
        Self {
            z_score: default_weight_z_score(),
            ema_deviation: default_weight_ema(),
            iqr_outlier: default_weight_iqr(),
            seasonal: default_weight_seasonal(),
            rolling_shift: default_weight_shift(),
        }
    }
}

impl MethodWeights {
    pub fn sum(&self) -> f64 {
        self.z_score + self.ema_deviation + self.iqr_outlier + self.seasonal + self.rolling_shift
    }

    pub fn validate(&self) -> Result<(), DetectorError> {
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(DetectorError::InvalidWeights { sum });
        }
        if [
            self.z_score,
            self.ema_deviation,
            self.iqr_outlier,
            self.seasonal,
            self.rolling_shift,
        ]
        .iter()
        .any(|w| *w < 0.0)
        {
            return Err(DetectorError::InvalidConfig(
                "method weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the detection ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Ring buffer capacity per metric
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Minimum samples per metric before emitting findings
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Higher sensitivity lowers the deviation threshold
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    /// EMA smoothing factor
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    /// IQR fence multiplier
    #[serde(default = "default_iqr_k")]
    pub iqr_k: f64,
    /// Minimum observations an hour bucket needs before the seasonal method votes
    #[serde(default = "default_seasonal_min")]
    pub seasonal_min_bucket_samples: u64,
    /// Recent-window length K for the level-shift method
    #[serde(default = "default_shift_window")]
    pub shift_window: usize,
    /// Findings below this confidence are discarded silently
    #[serde(default = "default_emission_floor")]
    pub emission_floor: f64,
    #[serde(default)]
    pub weights: MethodWeights,
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}
fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}
fn default_sensitivity() -> f64 {
    1.0
}
fn default_ema_alpha() -> f64 {
    DEFAULT_EMA_ALPHA
}
fn default_iqr_k() -> f64 {
    1.5
}
fn default_seasonal_min() -> u64 {
    DEFAULT_MIN_BUCKET_SAMPLES
}
fn default_shift_window() -> usize {
    5
}
fn default_emission_floor() -> f64 {
    DEFAULT_EMISSION_FLOOR
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            min_samples: default_min_samples(),
            sensitivity: default_sensitivity(),
            ema_alpha: default_ema_alpha(),
            iqr_k: default_iqr_k(),
            seasonal_min_bucket_samples: default_seasonal_min(),
            shift_window: default_shift_window(),
            emission_floor: default_emission_floor(),
            weights: MethodWeights::default(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), DetectorError> {
        self.weights.validate()?;
        if self.sensitivity <= 0.0 {
            return Err(DetectorError::InvalidConfig(
                "sensitivity must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ema_alpha) {
            return Err(DetectorError::InvalidConfig(
                "ema_alpha must be in [0, 1]".to_string(),
            ));
        }
        if self.shift_window == 0 || self.shift_window >= self.window_capacity {
            return Err(DetectorError::InvalidConfig(
                "shift_window must be positive and smaller than window_capacity".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single method's verdict for one sample
struct MethodVote {
    method: MethodId,
    vote: f64,
    fired: bool,
    reason: String,
}

/// Stateful detection ensemble over all tracked metrics
#[derive(Debug)]
pub struct AnomalyDetector {
    config: DetectorConfig,
    windows: HashMap<String, MetricWindow>,
    profiles: HashMap<String, SeasonalProfile>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorError> {
        config.validate()?;
        Ok(Self {
            config,
            windows: HashMap::new(),
            profiles: HashMap::new(),
        })
    }

    /// Ingest one sample; returns a finding when the ensemble confidence
    /// clears the emission floor
    ///
    /// Below the per-metric minimum sample floor nothing is emitted, no
    /// matter how extreme the value. The window and seasonal profile are
    /// updated on every call regardless of emission.
    pub fn ingest(&mut self, sample: &Sample) -> Option<Finding> {
        let window = self
            .windows
            .entry(sample.metric.clone())
            .or_insert_with(|| {
                MetricWindow::new(self.config.window_capacity, self.config.ema_alpha)
            });
        let profile = self
            .profiles
            .entry(sample.metric.clone())
            .or_insert_with(|| SeasonalProfile::new(self.config.seasonal_min_bucket_samples));

        // Evaluate against the pre-sample baseline so a spike cannot mask
        // itself, then fold the sample in.
        let finding = if window.len() >= self.config.min_samples {
            Self::evaluate(&self.config, window, profile, sample)
        } else {
            None
        };

        window.push(sample.timestamp, sample.value);
        profile.observe(sample.timestamp, sample.value);

        finding
    }

    /// Drop all windows and seasonal profiles
    pub fn reset(&mut self) {
        self.windows.clear();
        self.profiles.clear();
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Replace the config after validation; existing windows keep their
    /// current capacity, new metrics pick up the new one
    pub fn set_config(&mut self, config: DetectorConfig) -> Result<(), DetectorError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn window_stats(&self, metric: &str) -> Option<WindowStats> {
        self.windows.get(metric).map(|w| w.stats())
    }

    /// Most recent samples for a metric, newest last
    pub fn recent_samples(&self, metric: &str, limit: usize) -> Vec<(DateTime<Utc>, f64)> {
        self.windows
            .get(metric)
            .map(|w| w.recent(limit))
            .unwrap_or_default()
    }

    pub fn tracked_metrics(&self) -> Vec<String> {
        let mut metrics: Vec<String> = self.windows.keys().cloned().collect();
        metrics.sort();
        metrics
    }

    fn evaluate(
        config: &DetectorConfig,
        window: &MetricWindow,
        profile: &SeasonalProfile,
        sample: &Sample,
    ) -> Option<Finding> {
        let threshold = BASE_THRESHOLD_SIGMA / config.sensitivity;
        let votes = [
            Self::z_score_vote(window, sample.value, threshold),
            Self::ema_vote(window, sample.value, threshold),
            Self::iqr_vote(config, window, sample.value),
            Self::seasonal_vote(profile, sample, threshold),
            Self::shift_vote(config, window, sample.value),
        ];

        let mut confidence = 0.0;
        let mut voting_methods = Vec::new();
        let mut reasons = Vec::new();
        for vote in votes.into_iter().flatten() {
            if !vote.fired {
                continue;
            }
            confidence += vote.vote.clamp(0.0, 1.0) * Self::weight_of(&config.weights, vote.method);
            voting_methods.push(vote.method);
            reasons.push(vote.reason);
        }
        let confidence = confidence.clamp(0.0, 1.0);

        if confidence <= config.emission_floor {
            return None;
        }

        let expected = window.mean();
        Some(Finding {
            metric: sample.metric.clone(),
            timestamp: sample.timestamp,
            value: sample.value,
            expected,
            deviation: sample.value - expected,
            confidence,
            severity: Severity::from_confidence(confidence),
            voting_methods,
            reasons,
        })
    }

    fn weight_of(weights: &MethodWeights, method: MethodId) -> f64 {
        match method {
            MethodId::ZScore => weights.z_score,
            MethodId::EmaDeviation => weights.ema_deviation,
            MethodId::IqrOutlier => weights.iqr_outlier,
            MethodId::Seasonal => weights.seasonal,
            MethodId::RollingShift => weights.rolling_shift,
        }
    }

    /// Floor for a near-zero spread so a flat baseline does not make the
    /// detector infinitely sensitive
    fn spread_floor(scale: f64) -> f64 {
        (scale.abs() * 0.01).max(1e-6)
    }

    fn z_score_vote(window: &MetricWindow, value: f64, threshold: f64) -> Option<MethodVote> {
        let std_dev = window.std_dev().max(Self::spread_floor(window.mean()));
        let z = (value - window.mean()).abs() / std_dev;
        let fired = z > threshold;
        Some(MethodVote {
            method: MethodId::ZScore,
            vote: ((z - threshold) / threshold).clamp(0.0, 1.0),
            fired,
            reason: format!(
                "z-score {:.2} exceeds threshold {:.2} (mean {:.2}, stddev {:.2})",
                z,
                threshold,
                window.mean(),
                window.std_dev()
            ),
        })
    }

    fn ema_vote(window: &MetricWindow, value: f64, threshold: f64) -> Option<MethodVote> {
        let ema = window.ema()?;
        let spread = window.ema_std_dev().max(Self::spread_floor(ema));
        let deviation = (value - ema).abs() / spread;
        let fired = deviation > threshold;
        Some(MethodVote {
            method: MethodId::EmaDeviation,
            vote: ((deviation - threshold) / threshold).clamp(0.0, 1.0),
            fired,
            reason: format!(
                "value {:.2} deviates {:.2}x from EMA {:.2}",
                value, deviation, ema
            ),
        })
    }

    fn iqr_vote(config: &DetectorConfig, window: &MetricWindow, value: f64) -> Option<MethodVote> {
        let (q1, q3) = window.quartiles()?;
        let iqr = q3 - q1;
        let lower = q1 - config.iqr_k * iqr;
        let upper = q3 + config.iqr_k * iqr;

        let excess = if value < lower {
            lower - value
        } else if value > upper {
            value - upper
        } else {
            0.0
        };
        let fired = excess > 0.0;
        let scale = iqr.max(Self::spread_floor(window.mean()));
        Some(MethodVote {
            method: MethodId::IqrOutlier,
            vote: (excess / scale).clamp(0.0, 1.0),
            fired,
            reason: format!(
                "value {:.2} outside IQR fence [{:.2}, {:.2}]",
                value, lower, upper
            ),
        })
    }

    fn seasonal_vote(profile: &SeasonalProfile, sample: &Sample, threshold: f64) -> Option<MethodVote> {
        let bucket = profile.baseline_for(sample.timestamp)?;
        let std_dev = bucket.std_dev().max(Self::spread_floor(bucket.mean));
        let z = (sample.value - bucket.mean).abs() / std_dev;
        let fired = z > threshold;
        Some(MethodVote {
            method: MethodId::Seasonal,
            vote: ((z - threshold) / threshold).clamp(0.0, 1.0),
            fired,
            reason: format!(
                "value {:.2} deviates {:.2} sigma from hour-of-day baseline {:.2}",
                sample.value, z, bucket.mean
            ),
        })
    }

    fn shift_vote(config: &DetectorConfig, window: &MetricWindow, value: f64) -> Option<MethodVote> {
        let k = config.shift_window;
        // The incoming value counts as the newest of the recent K
        let recent_tail = window.recent_mean(k - 1);
        let recent = match (k, recent_tail) {
            (1, _) => value,
            (_, Some(tail)) => (tail * (k - 1) as f64 + value) / k as f64,
            (_, None) => return None,
        };
        let preceding = window.preceding_mean(k - 1)?;

        let spread = window.std_dev().max(Self::spread_floor(preceding));
        let shift = (recent - preceding).abs() / spread;
        // Level shifts show up at lower magnitudes than point outliers
        let threshold = 2.0 / config.sensitivity;
        let fired = shift > threshold;
        Some(MethodVote {
            method: MethodId::RollingShift,
            vote: ((shift - threshold) / threshold).clamp(0.0, 1.0),
            fired,
            reason: format!(
                "recent mean {:.2} shifted from preceding mean {:.2}",
                recent, preceding
            ),
        })
    }
}
