use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution, Max, OrderStatistics};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Latency percentiles over a window of recent forward passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut data = Data::new(samples.to_vec());

        Self {
            count: samples.len(),
            mean: data.mean().unwrap_or(0.0),
            median: data.median(),
            p95: data.quantile(0.95),
            p99: data.quantile(0.99),
            max: data.max(),
        }
    }
}

/// Bounded ring of the most recent latency samples, in milliseconds.
#[derive(Debug)]
pub struct LatencyWindow {
    capacity: usize,
    samples: Mutex<VecDeque<f64>>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn record(&self, millis: f64) {
        let Ok(mut samples) = self.samples.lock() else {
            return;
        };
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(millis);
    }

    pub fn summary(&self) -> LatencySummary {
        let samples: Vec<f64> = match self.samples.lock() {
            Ok(samples) => samples.iter().copied().collect(),
            Err(_) => return LatencySummary::default(),
        };
        LatencySummary::from_samples(&samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let summary = LatencySummary::from_samples(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        assert_eq!(summary.count, 5);
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.max, 5.0);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(LatencySummary::from_samples(&[]), LatencySummary::default());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let window = LatencyWindow::new(3);
        for ms in [100.0, 1.0, 2.0, 3.0] {
            window.record(ms);
        }

        let summary = window.summary();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.max, 3.0);
        assert_eq!(summary.mean, 2.0);
    }
}
