//! Time-series storage for metric samples.
//!
//! [`memory::MemoryStore`] is the default backend. [`engine::SqliteStore`]
//! is a persistent drop-in replacement that keeps one SQLite database per
//! day. Both implement [`TimeSeriesStore`], which is all the alerting and
//! anomaly engines depend on.

pub mod engine;
pub mod error;
pub mod memory;
pub mod partition;


use chrono::{DateTime, Utc};
use error::{Result, StorageError};
use hivemon_common::types::MetricPoint;
use std::collections::HashMap;

/// Parameters for a time-range query over one metric.
///
/// # Examples
///
/// ```
/// use hivemon_storage::MetricQuery;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let query = MetricQuery::new("queue.depth", now - Duration::hours(1), now)
///     .with_label("queue", "default");
/// assert_eq!(query.metric, "queue.depth");
/// assert_eq!(query.labels.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub metric: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Points must carry every one of these labels (superset match).
    pub labels: HashMap<String, String>,
}

impl MetricQuery {
    pub fn new(metric: impl Into<String>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            metric: metric.into(),
            from,
            to,
            labels: HashMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Append-only store of metric samples.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because samples are recorded by platform components while the
/// evaluation and detection loops read concurrently.
pub trait TimeSeriesStore: Send + Sync {
    /// Appends one sample.
    fn write(&self, point: MetricPoint) -> Result<()>;

    /// Appends several samples, stopping at the first failure.
    fn write_batch(&self, points: &[MetricPoint]) -> Result<()> {
        for point in points {
            self.write(point.clone())?;
        }
        Ok(())
    }

    /// Returns the samples of `query.metric` within `[from, to]` whose labels
    /// are a superset of `query.labels`, in ascending timestamp order.
    fn query(&self, query: &MetricQuery) -> Result<Vec<MetricPoint>>;

    /// Returns the most recent sample matching the query, if any.
    fn latest(&self, query: &MetricQuery) -> Result<Option<MetricPoint>> {
        Ok(self.query(query)?.pop())
    }

    /// Names of all metrics that currently hold data.
    fn metric_names(&self) -> Result<Vec<String>>;

    /// Removes all data.
    fn clear(&self) -> Result<()>;

    /// Drops data older than `cutoff`. Returns how many storage units were
    /// removed (samples for the in-memory store, daily partitions for SQLite).
    fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Builds and writes a sample. The timestamp defaults to now.
    fn record(
        &self,
        metric: &str,
        value: f64,
        labels: Option<HashMap<String, String>>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let point = MetricPoint {
            metric: metric.to_string(),
            timestamp: timestamp.unwrap_or_else(Utc::now),
            value,
            labels: labels.unwrap_or_default(),
        };
        self.write(point)
    }
}

/// Rejects samples whose value is not a finite number.
pub fn validate_point(point: &MetricPoint) -> Result<()> {
    if point.value.is_finite() {
        Ok(())
    } else {
        Err(StorageError::InvalidValue {
            metric: point.metric.clone(),
            value: point.value,
        })
    }
}
