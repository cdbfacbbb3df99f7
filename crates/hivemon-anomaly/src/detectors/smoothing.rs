use crate::error::{AnomalyError, Result};
use crate::{build_anomaly, check_threshold, stats, AnomalyDetector};
use hivemon_common::types::{Anomaly, MetricPoint};

/// Exponential-smoothing forecaster.
///
/// Replays the whole series on every call, keeping a running forecast
/// `f <- f + alpha * (actual - f)` and an exponentially weighted residual
/// variance. A sample is flagged when its residual exceeds
/// `threshold_std_dev` running standard deviations. No sample before
/// `warmup` is flagged.
#[derive(Debug, Clone)]
pub struct ExponentialSmoothingDetector {
    alpha: f64,
    threshold_std_dev: f64,
    warmup: usize,
}

impl ExponentialSmoothingDetector {
    pub fn new(alpha: f64, threshold_std_dev: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(AnomalyError::InvalidParameter(format!(
                "alpha must be in (0, 1), got {alpha}"
            )));
        }
        check_threshold(threshold_std_dev)?;
        Ok(Self {
            alpha,
            threshold_std_dev,
            warmup: 10,
        })
    }

    /// Overrides the number of leading samples that are never flagged.
    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup.max(2);
        self
    }
}

impl Default for ExponentialSmoothingDetector {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            threshold_std_dev: 3.0,
            warmup: 10,
        }
    }
}

impl AnomalyDetector for ExponentialSmoothingDetector {
    fn name(&self) -> &str {
        "exponential_smoothing"
    }

    fn detect(&self, points: &[MetricPoint]) -> Vec<Anomaly> {
        let Some(first) = points.first() else {
            return Vec::new();
        };
        if points.len() <= self.warmup {
            return Vec::new();
        }

        let mut forecast = first.value;
        let mut variance: f64 = 0.0;
        let mut anomalies = Vec::new();

        for (i, point) in points.iter().enumerate().skip(1) {
            let residual = point.value - forecast;

            if i >= self.warmup {
                let spread = stats::floor_spread(variance.sqrt(), forecast);
                let score = residual.abs() / spread;
                if score > self.threshold_std_dev {
                    anomalies.push(build_anomaly(
                        self.name(),
                        point,
                        forecast,
                        score,
                        self.threshold_std_dev,
                    ));
                }
            }

            variance = (1.0 - self.alpha) * variance + self.alpha * residual * residual;
            forecast += self.alpha * residual;
        }

        anomalies
    }
}
