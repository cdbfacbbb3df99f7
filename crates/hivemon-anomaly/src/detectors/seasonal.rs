use crate::error::{AnomalyError, Result};
use crate::{build_anomaly, check_threshold, stats, AnomalyDetector};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use hivemon_common::types::{Anomaly, MetricPoint};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalPeriod {
    /// Buckets by hour of day (24 buckets).
    Daily,
    /// Buckets by weekday and hour (168 buckets).
    Weekly,
}

impl SeasonalPeriod {
    pub fn duration(&self) -> Duration {
        match self {
            SeasonalPeriod::Daily => Duration::days(1),
            SeasonalPeriod::Weekly => Duration::weeks(1),
        }
    }

    fn bucket(&self, ts: DateTime<Utc>) -> u32 {
        match self {
            SeasonalPeriod::Daily => ts.hour(),
            SeasonalPeriod::Weekly => ts.weekday().num_days_from_monday() * 24 + ts.hour(),
        }
    }
}

impl std::str::FromStr for SeasonalPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(SeasonalPeriod::Daily),
            "weekly" => Ok(SeasonalPeriod::Weekly),
            _ => Err(format!("unknown seasonal period: {s}")),
        }
    }
}

/// Seasonal baseline detector.
///
/// The most recent cycle of the series (samples newer than one period before
/// the last sample) is judged against a per-bucket mean and standard
/// deviation built from everything older. Nothing is flagged until the
/// baseline spans `min_cycles` full periods, and a bucket must hold samples
/// from at least `min_cycles` distinct cycles before its points are scored.
#[derive(Debug, Clone)]
pub struct SeasonalDetector {
    period: SeasonalPeriod,
    threshold_std_dev: f64,
    min_cycles: usize,
}

impl SeasonalDetector {
    pub fn new(period: SeasonalPeriod, threshold_std_dev: f64) -> Result<Self> {
        check_threshold(threshold_std_dev)?;
        Ok(Self {
            period,
            threshold_std_dev,
            min_cycles: 2,
        })
    }

    pub fn with_min_cycles(mut self, min_cycles: usize) -> Result<Self> {
        if min_cycles < 2 {
            return Err(AnomalyError::InvalidParameter(format!(
                "min_cycles must be at least 2, got {min_cycles}"
            )));
        }
        self.min_cycles = min_cycles;
        Ok(self)
    }

    pub fn period(&self) -> SeasonalPeriod {
        self.period
    }
}

impl AnomalyDetector for SeasonalDetector {
    fn name(&self) -> &str {
        "seasonal"
    }

    fn detect(&self, points: &[MetricPoint]) -> Vec<Anomaly> {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Vec::new();
        };
        let period = self.period.duration();
        let cutoff = last.timestamp - period;
        let split = points.partition_point(|p| p.timestamp <= cutoff);
        let (baseline, recent) = points.split_at(split);

        if cutoff - first.timestamp < period * self.min_cycles as i32 {
            return Vec::new();
        }

        let period_secs = period.num_seconds();
        let mut buckets: HashMap<u32, (Vec<f64>, HashSet<i64>)> = HashMap::new();
        for p in baseline {
            let (values, cycles) = buckets.entry(self.period.bucket(p.timestamp)).or_default();
            values.push(p.value);
            cycles.insert(p.timestamp.timestamp().div_euclid(period_secs));
        }

        recent
            .iter()
            .filter_map(|p| {
                let (values, cycles) = buckets.get(&self.period.bucket(p.timestamp))?;
                if cycles.len() < self.min_cycles {
                    return None;
                }
                let mean = stats::mean(values);
                let spread = stats::floor_spread(stats::std_dev(values), mean);
                let score = (p.value - mean).abs() / spread;
                (score > self.threshold_std_dev)
                    .then(|| build_anomaly(self.name(), p, mean, score, self.threshold_std_dev))
            })
            .collect()
    }

    fn lookback(&self) -> Option<Duration> {
        // Baseline cycles, the cycle under evaluation, and one spare cycle so
        // the baseline span still holds when samples miss the window edge.
        Some(self.period.duration() * (self.min_cycles as i32 + 2))
    }
}
