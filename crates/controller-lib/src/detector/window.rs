//! Per-metric sample window
//!
//! Maintains a bounded ring buffer of the most recent samples for one metric
//! plus the derived statistics the detection methods consume: mean, standard
//! deviation, quartiles, exponential moving average and recent/preceding
//! split means for level-shift detection.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default ring buffer capacity
pub const DEFAULT_WINDOW_CAPACITY: usize = 1000;

/// Default EMA smoothing factor
pub const DEFAULT_EMA_ALPHA: f64 = 0.2;

/// Bounded sample window with derived statistics for one metric
#[derive(Debug, Clone)]
pub struct MetricWindow {
    capacity: usize,
    samples: VecDeque<(DateTime<Utc>, f64)>,
    mean: f64,
    std_dev: f64,
    ema: Option<f64>,
    ema_var: f64,
    ema_alpha: f64,
}

impl MetricWindow {
    pub fn new(capacity: usize, ema_alpha: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
            mean: 0.0,
            std_dev: 0.0,
            ema: None,
            ema_var: 0.0,
            ema_alpha,
        }
    }

    /// Append a sample, evicting the oldest when at capacity
    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((timestamp, value));

        // EMA and EW variance update before the rolling stats
        match self.ema {
            None => {
                self.ema = Some(value);
                self.ema_var = 0.0;
            }
            Some(prev) => {
                let diff = value - prev;
                let incr = self.ema_alpha * diff;
                self.ema = Some(prev + incr);
                self.ema_var = (1.0 - self.ema_alpha) * (self.ema_var + diff * incr);
            }
        }

        self.recalculate_stats();
    }

    /// Recalculate mean and std_dev from current samples
    fn recalculate_stats(&mut self) {
        let n = self.samples.len();
        if n == 0 {
            self.mean = 0.0;
            self.std_dev = 0.0;
            return;
        }

        let sum: f64 = self.samples.iter().map(|(_, v)| v).sum();
        self.mean = sum / n as f64;

        if n > 1 {
            // Sample variance (Bessel's correction)
            let variance: f64 = self
                .samples
                .iter()
                .map(|(_, v)| (v - self.mean).powi(2))
                .sum::<f64>()
                / (n - 1) as f64;
            self.std_dev = variance.sqrt();
        } else {
            self.std_dev = 0.0;
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema
    }

    /// Standard deviation of the exponentially weighted window
    pub fn ema_std_dev(&self) -> f64 {
        self.ema_var.max(0.0).sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|(_, v)| *v)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn max(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|(_, v)| *v)
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Linear-interpolated percentile of the current window, p in [0, 1]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().map(|(_, v)| *v).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            return Some(sorted[lo]);
        }
        let frac = rank - lo as f64;
        Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
    }

    /// First and third quartiles
    pub fn quartiles(&self) -> Option<(f64, f64)> {
        Some((self.percentile(0.25)?, self.percentile(0.75)?))
    }

    /// Mean of the most recent `k` samples
    pub fn recent_mean(&self, k: usize) -> Option<f64> {
        if k == 0 || self.samples.len() < k {
            return None;
        }
        let sum: f64 = self.samples.iter().rev().take(k).map(|(_, v)| v).sum();
        Some(sum / k as f64)
    }

    /// Mean of everything preceding the most recent `k` samples
    pub fn preceding_mean(&self, k: usize) -> Option<f64> {
        let n = self.samples.len();
        if n <= k {
            return None;
        }
        let count = n - k;
        let sum: f64 = self.samples.iter().take(count).map(|(_, v)| v).sum();
        Some(sum / count as f64)
    }

    /// Most recent samples, newest last, at most `limit`
    pub fn recent(&self, limit: usize) -> Vec<(DateTime<Utc>, f64)> {
        let skip = self.samples.len().saturating_sub(limit);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// Snapshot of the derived statistics for inspection
    pub fn stats(&self) -> WindowStats {
        WindowStats {
            count: self.samples.len(),
            mean: self.mean,
            std_dev: self.std_dev,
            min: self.min(),
            max: self.max(),
            ema: self.ema,
        }
    }
}

/// Inspectable window statistics, served over the operator API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub ema: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_mean_and_std_dev() {
        let mut window = MetricWindow::new(100, DEFAULT_EMA_ALPHA);
        for i in 1..=20 {
            window.push(ts(i * 60), i as f64);
        }

        assert!((window.mean() - 10.5).abs() < 0.01);
        assert!(window.std_dev() > 0.0);
        assert_eq!(window.len(), 20);
    }

    #[test]
    fn test_capacity_eviction() {
        let mut window = MetricWindow::new(10, DEFAULT_EMA_ALPHA);
        for i in 0..25 {
            window.push(ts(i), i as f64);
        }

        assert_eq!(window.len(), 10);
        // Oldest surviving value is 15
        assert_eq!(window.min(), Some(15.0));
        assert_eq!(window.max(), Some(24.0));
    }

    #[test]
    fn test_percentile_interpolation() {
        let mut window = MetricWindow::new(100, DEFAULT_EMA_ALPHA);
        for i in 1..=5 {
            window.push(ts(i), i as f64);
        }

        assert_eq!(window.percentile(0.0), Some(1.0));
        assert_eq!(window.percentile(1.0), Some(5.0));
        assert_eq!(window.percentile(0.5), Some(3.0));

        let (q1, q3) = window.quartiles().unwrap();
        assert_eq!(q1, 2.0);
        assert_eq!(q3, 4.0);
    }

    #[test]
    fn test_ema_follows_level_change() {
        let mut window = MetricWindow::new(100, 0.5);
        for i in 0..10 {
            window.push(ts(i), 10.0);
        }
        assert!((window.ema().unwrap() - 10.0).abs() < 1e-9);
        assert!(window.ema_std_dev() < 1e-9);

        window.push(ts(11), 20.0);
        let ema = window.ema().unwrap();
        assert!(ema > 10.0 && ema < 20.0);
        assert!(window.ema_std_dev() > 0.0);
    }

    #[test]
    fn test_recent_and_preceding_means() {
        let mut window = MetricWindow::new(100, DEFAULT_EMA_ALPHA);
        for _ in 0..10 {
            window.push(ts(0), 1.0);
        }
        for _ in 0..5 {
            window.push(ts(1), 11.0);
        }

        assert_eq!(window.recent_mean(5), Some(11.0));
        assert_eq!(window.preceding_mean(5), Some(1.0));
        assert_eq!(window.preceding_mean(15), None);
    }

    #[test]
    fn test_recent_snapshot_is_bounded() {
        let mut window = MetricWindow::new(100, DEFAULT_EMA_ALPHA);
        for i in 0..50 {
            window.push(ts(i), i as f64);
        }

        let recent = window.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.last().unwrap().1, 49.0);
    }
}
