//! Statistical anomaly detection over metric series.
//!
//! Detectors implement [`AnomalyDetector`]: a pure function from an ordered
//! slice of samples to the samples it considers anomalous. Built-in detectors
//! are z-score ([`detectors::statistical`]), seasonal baseline
//! ([`detectors::seasonal`]), median absolute deviation ([`detectors::mad`])
//! and exponential smoothing ([`detectors::smoothing`]);
//! [`detectors::composite`] unions several of them. The
//! [`service::AnomalyDetectionService`] runs one detector per metric against
//! a [`hivemon_storage::TimeSeriesStore`].

pub mod detectors;
pub mod error;
pub mod service;
pub mod stats;

#[cfg(test)]
mod tests;

use chrono::Duration;
use hivemon_common::types::{Anomaly, AnomalySeverity, MetricPoint};

/// A detector that flags anomalous samples in a series.
///
/// `detect` must be deterministic and free of side effects. It never fails:
/// when the series is too short to judge, it returns an empty result.
pub trait AnomalyDetector: Send + Sync {
    /// Short identifier recorded on every anomaly this detector produces.
    fn name(&self) -> &str;

    /// Returns the anomalous samples of `points`, which are ordered by
    /// ascending timestamp and belong to a single metric. The `id` field of
    /// returned anomalies is left empty; the service assigns it on record.
    fn detect(&self, points: &[MetricPoint]) -> Vec<Anomaly>;

    /// History this detector needs, if longer than the service default.
    fn lookback(&self) -> Option<Duration> {
        None
    }
}

/// Maps a deviation score to a severity band relative to the detector's
/// threshold. Bands grow monotonically with the score.
///
/// # Examples
///
/// ```
/// use hivemon_anomaly::severity_for;
/// use hivemon_common::types::AnomalySeverity;
///
/// assert_eq!(severity_for(3.1, 3.0), AnomalySeverity::Low);
/// assert_eq!(severity_for(4.0, 3.0), AnomalySeverity::Medium);
/// assert_eq!(severity_for(4.5, 3.0), AnomalySeverity::High);
/// assert_eq!(severity_for(9.0, 3.0), AnomalySeverity::Critical);
/// ```
pub fn severity_for(score: f64, threshold: f64) -> AnomalySeverity {
    let ratio = score / threshold;
    if ratio >= 3.0 {
        AnomalySeverity::Critical
    } else if ratio >= 1.5 {
        AnomalySeverity::High
    } else if ratio >= 1.25 {
        AnomalySeverity::Medium
    } else {
        AnomalySeverity::Low
    }
}

pub(crate) fn build_anomaly(
    detector: &str,
    point: &MetricPoint,
    expected: f64,
    score: f64,
    threshold: f64,
) -> Anomaly {
    Anomaly {
        id: String::new(),
        metric: point.metric.clone(),
        timestamp: point.timestamp,
        value: point.value,
        expected,
        deviation_score: score,
        severity: severity_for(score, threshold),
        detector: detector.to_string(),
        labels: point.labels.clone(),
    }
}

pub(crate) fn check_threshold(threshold: f64) -> error::Result<()> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(error::AnomalyError::InvalidParameter(format!(
            "threshold must be a positive number, got {threshold}"
        )))
    }
}
