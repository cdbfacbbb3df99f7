use crate::error::Result;
use crate::partition::PartitionManager;
use crate::{validate_point, MetricQuery, TimeSeriesStore};
use chrono::{DateTime, Utc};
use hivemon_common::types::MetricPoint;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Persistent store backed by daily-partitioned SQLite databases in WAL mode.
pub struct SqliteStore {
    partitions: PartitionManager,
}

impl SqliteStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }

    fn insert(&self, key: &str, points: &[&MetricPoint]) -> Result<()> {
        self.partitions.with_partition(key, |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO metrics (timestamp, metric, value, labels) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for point in points {
                    let labels_json = serde_json::to_string(&point.labels)?;
                    stmt.execute(rusqlite::params![
                        point.timestamp.timestamp_millis(),
                        &point.metric,
                        point.value,
                        labels_json,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

impl TimeSeriesStore for SqliteStore {
    fn write(&self, point: MetricPoint) -> Result<()> {
        validate_point(&point)?;
        let key = self.partitions.get_or_create(point.timestamp)?;
        self.insert(&key, &[&point])
    }

    fn write_batch(&self, points: &[MetricPoint]) -> Result<()> {
        let mut by_partition: BTreeMap<String, Vec<&MetricPoint>> = BTreeMap::new();
        for point in points {
            validate_point(point)?;
            let key = self.partitions.get_or_create(point.timestamp)?;
            by_partition.entry(key).or_default().push(point);
        }
        for (key, group) in by_partition {
            self.insert(&key, &group)?;
        }
        Ok(())
    }

    fn query(&self, query: &MetricQuery) -> Result<Vec<MetricPoint>> {
        let keys = self.partitions.partitions_in_range(query.from, query.to)?;
        let from_ms = query.from.timestamp_millis();
        let to_ms = query.to.timestamp_millis();
        let mut results = Vec::new();

        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT timestamp, value, labels FROM metrics
                     WHERE metric = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                     ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![&query.metric, from_ms, to_ms],
                    |row| {
                        let ts_ms: i64 = row.get(0)?;
                        let value: f64 = row.get(1)?;
                        let labels_str: String = row.get(2)?;
                        Ok((ts_ms, value, labels_str))
                    },
                )?;
                for row in rows {
                    let (ts_ms, value, labels_str) = row?;
                    let Some(timestamp) = DateTime::from_timestamp_millis(ts_ms) else {
                        continue;
                    };
                    let labels: HashMap<String, String> = serde_json::from_str(&labels_str)?;
                    let point = MetricPoint {
                        metric: query.metric.clone(),
                        timestamp,
                        value,
                        labels,
                    };
                    if point.matches_labels(&query.labels) {
                        results.push(point);
                    }
                }
                Ok(())
            })?;
        }

        // Stable sort keeps insertion order for equal timestamps.
        results.sort_by_key(|p| p.timestamp);
        Ok(results)
    }

    fn metric_names(&self) -> Result<Vec<String>> {
        let files = self.partitions.partition_files()?;
        let (Some((first, _)), Some((last, _))) = (files.first(), files.last()) else {
            return Ok(Vec::new());
        };
        let from = first.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let to = last.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc();

        let mut names = BTreeSet::new();
        for key in self.partitions.partitions_in_range(from, to)? {
            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached("SELECT DISTINCT metric FROM metrics")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                for row in rows {
                    names.insert(row?);
                }
                Ok(())
            })?;
        }
        Ok(names.into_iter().collect())
    }

    fn clear(&self) -> Result<()> {
        self.partitions.remove_all()?;
        Ok(())
    }

    fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.partitions.remove_older_than(cutoff)
    }
}
