use crate::error::Result;
use crate::{validate_point, MetricQuery, TimeSeriesStore};
use chrono::{DateTime, Utc};
use hivemon_common::types::MetricPoint;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory store keeping each metric's samples sorted by timestamp.
///
/// Appends in timestamp order are O(1); late samples are inserted at their
/// sorted position so queries can binary-search the range bounds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<String, Vec<MetricPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of samples across all metrics.
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<MetricPoint>>> {
        self.series
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<MetricPoint>>> {
        self.series
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TimeSeriesStore for MemoryStore {
    fn write(&self, point: MetricPoint) -> Result<()> {
        validate_point(&point)?;
        let mut series = self.write_lock();
        let points = series.entry(point.metric.clone()).or_default();
        match points.last() {
            Some(last) if last.timestamp > point.timestamp => {
                let idx = points.partition_point(|p| p.timestamp <= point.timestamp);
                points.insert(idx, point);
            }
            _ => points.push(point),
        }
        Ok(())
    }

    fn write_batch(&self, batch: &[MetricPoint]) -> Result<()> {
        for point in batch {
            validate_point(point)?;
        }
        for point in batch {
            self.write(point.clone())?;
        }
        Ok(())
    }

    fn query(&self, query: &MetricQuery) -> Result<Vec<MetricPoint>> {
        let series = self.read();
        let Some(points) = series.get(&query.metric) else {
            return Ok(Vec::new());
        };
        let start = points.partition_point(|p| p.timestamp < query.from);
        let end = points.partition_point(|p| p.timestamp <= query.to);
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(points[start..end]
            .iter()
            .filter(|p| p.matches_labels(&query.labels))
            .cloned()
            .collect())
    }

    fn metric_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, points)| !points.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn clear(&self) -> Result<()> {
        self.write_lock().clear();
        Ok(())
    }

    fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut series = self.write_lock();
        let mut removed = 0;
        for points in series.values_mut() {
            let expired = points.partition_point(|p| p.timestamp < cutoff);
            points.drain(..expired);
            removed += expired;
        }
        series.retain(|_, points| !points.is_empty());
        Ok(removed)
    }
}
