//! Temperature sampling and bounded history (specification §4.4 "Thermal
//! Controller").

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A single temperature reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub timestamp: DateTime<Utc>,
    pub celsius: f64,
}

/// Simple running statistics over a set of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stdev: f64,
    pub count: usize,
}

/// Number of most-recent samples the population stdev is computed over,
/// independent of how many samples the ring buffer retains.
const STDEV_WINDOW: usize = 100;

/// Fixed-capacity ring buffer of temperature samples. The Thermal Controller
/// polls on a 2s cadence and keeps the most recent 1000 samples
/// (~33 minutes of history) for drift and stability diagnostics.
pub struct TemperatureHistory {
    capacity: usize,
    samples: Mutex<VecDeque<TemperatureSample>>,
}

impl TemperatureHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Default capacity used by the Thermal Controller (1000 samples).
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn push(&self, sample: TemperatureSample) {
        let mut guard = self.samples.lock();
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn latest(&self) -> Option<TemperatureSample> {
        self.samples.lock().back().copied()
    }

    pub fn snapshot(&self) -> Vec<TemperatureSample> {
        self.samples.lock().iter().copied().collect()
    }

    /// Compute avg/min/max over the full retained history and population
    /// stdev over only the most recent `min(100, len)` samples. Returns
    /// `None` if no samples have been recorded.
    pub fn stats(&self) -> Option<TemperatureStats> {
        let guard = self.samples.lock();
        if guard.is_empty() {
            return None;
        }
        let count = guard.len();
        let sum: f64 = guard.iter().map(|s| s.celsius).sum();
        let avg = sum / count as f64;
        let min = guard.iter().map(|s| s.celsius).fold(f64::INFINITY, f64::min);
        let max = guard
            .iter()
            .map(|s| s.celsius)
            .fold(f64::NEG_INFINITY, f64::max);

        let window = count.min(STDEV_WINDOW);
        let stdev = if window < 2 {
            0.0
        } else {
            let recent: Vec<f64> = guard.iter().rev().take(window).map(|s| s.celsius).collect();
            let recent_avg = recent.iter().sum::<f64>() / window as f64;
            let variance = recent.iter().map(|c| (c - recent_avg).powi(2)).sum::<f64>() / window as f64;
            variance.sqrt()
        };

        Some(TemperatureStats {
            avg,
            min,
            max,
            stdev,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(celsius: f64) -> TemperatureSample {
        TemperatureSample {
            timestamp: Utc::now(),
            celsius,
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let hist = TemperatureHistory::new(3);
        hist.push(sample(1.0));
        hist.push(sample(2.0));
        hist.push(sample(3.0));
        hist.push(sample(4.0));
        let snap = hist.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].celsius, 2.0);
        assert_eq!(snap[2].celsius, 4.0);
    }

    #[test]
    fn stats_on_empty_is_none() {
        let hist = TemperatureHistory::new(10);
        assert!(hist.stats().is_none());
    }

    #[test]
    fn stats_computed_correctly() {
        let hist = TemperatureHistory::new(10);
        for v in [-10.0, -10.0, -10.0] {
            hist.push(sample(v));
        }
        let stats = hist.stats().unwrap();
        assert_eq!(stats.avg, -10.0);
        assert_eq!(stats.min, -10.0);
        assert_eq!(stats.max, -10.0);
        assert_eq!(stats.stdev, 0.0);
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn latest_returns_most_recent() {
        let hist = TemperatureHistory::new(10);
        hist.push(sample(1.0));
        hist.push(sample(2.0));
        assert_eq!(hist.latest().unwrap().celsius, 2.0);
    }

    #[test]
    fn single_sample_stdev_is_zero() {
        let hist = TemperatureHistory::new(10);
        hist.push(sample(-5.0));
        assert_eq!(hist.stats().unwrap().stdev, 0.0);
    }

    #[test]
    fn stdev_ignores_samples_older_than_the_window() {
        let hist = TemperatureHistory::new(200);
        // 150 wildly varying old samples, outside the 100-sample stdev window.
        for i in 0..150 {
            hist.push(sample(if i % 2 == 0 { -50.0 } else { 50.0 }));
        }
        // 100 recent, perfectly stable samples.
        for _ in 0..100 {
            hist.push(sample(-10.0));
        }
        let stats = hist.stats().unwrap();
        assert_eq!(stats.count, 200);
        assert_eq!(stats.stdev, 0.0);
        assert_ne!(stats.avg, -10.0);
    }
}
