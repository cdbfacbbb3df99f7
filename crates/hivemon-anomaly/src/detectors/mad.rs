use crate::error::{AnomalyError, Result};
use crate::stats::{self, MAD_SCALE, MEAN_AD_SCALE};
use crate::{build_anomaly, check_threshold, AnomalyDetector};
use hivemon_common::types::{Anomaly, MetricPoint};

/// Robust detector based on the median absolute deviation.
///
/// The median and MAD are barely moved by the outliers they are meant to
/// find, so a spike does not mask itself the way it can under a z-score.
#[derive(Debug, Clone)]
pub struct MadDetector {
    threshold: f64,
    min_window: usize,
}

impl MadDetector {
    pub fn new(threshold: f64, min_window: usize) -> Result<Self> {
        check_threshold(threshold)?;
        if min_window < 3 {
            return Err(AnomalyError::InvalidParameter(format!(
                "min_window must be at least 3, got {min_window}"
            )));
        }
        Ok(Self {
            threshold,
            min_window,
        })
    }
}

impl Default for MadDetector {
    fn default() -> Self {
        Self {
            threshold: 3.5,
            min_window: 10,
        }
    }
}

impl AnomalyDetector for MadDetector {
    fn name(&self) -> &str {
        "mad"
    }

    fn detect(&self, points: &[MetricPoint]) -> Vec<Anomaly> {
        if points.len() < self.min_window {
            return Vec::new();
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let median = stats::median(&values);
        let mad = stats::median_abs_deviation(&values, median);

        // More than half the window sits exactly on the median: fall back to
        // the mean absolute deviation so the remaining points can still score.
        let spread = if mad > 0.0 {
            MAD_SCALE * mad
        } else {
            MEAN_AD_SCALE * stats::mean_abs_deviation(&values, median)
        };
        let spread = stats::floor_spread(spread, median);

        points
            .iter()
            .filter_map(|p| {
                let score = (p.value - median).abs() / spread;
                (score > self.threshold)
                    .then(|| build_anomaly(self.name(), p, median, score, self.threshold))
            })
            .collect()
    }
}
