use crate::error::{AnomalyError, Result};
use crate::{build_anomaly, check_threshold, stats, AnomalyDetector};
use hivemon_common::types::{Anomaly, MetricPoint};

/// Z-score detector: flags samples more than `threshold_std_dev` standard
/// deviations from the mean of the window.
#[derive(Debug, Clone)]
pub struct StatisticalDetector {
    threshold_std_dev: f64,
    min_window: usize,
}

impl StatisticalDetector {
    pub fn new(threshold_std_dev: f64, min_window: usize) -> Result<Self> {
        check_threshold(threshold_std_dev)?;
        if min_window < 2 {
            return Err(AnomalyError::InvalidParameter(format!(
                "min_window must be at least 2, got {min_window}"
            )));
        }
        Ok(Self {
            threshold_std_dev,
            min_window,
        })
    }
}

impl Default for StatisticalDetector {
    fn default() -> Self {
        Self {
            threshold_std_dev: 3.0,
            min_window: 30,
        }
    }
}

impl AnomalyDetector for StatisticalDetector {
    fn name(&self) -> &str {
        "statistical"
    }

    fn detect(&self, points: &[MetricPoint]) -> Vec<Anomaly> {
        if points.len() < self.min_window {
            return Vec::new();
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let mean = stats::mean(&values);
        let std_dev = stats::std_dev(&values);
        if std_dev == 0.0 {
            return Vec::new();
        }

        points
            .iter()
            .filter_map(|p| {
                let z = (p.value - mean).abs() / std_dev;
                (z > self.threshold_std_dev)
                    .then(|| build_anomaly(self.name(), p, mean, z, self.threshold_std_dev))
            })
            .collect()
    }
}
