use crate::error::{Result, StorageError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const METRICS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    timestamp INTEGER NOT NULL,
    metric TEXT NOT NULL,
    value REAL NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_metrics_metric_time
    ON metrics(metric, timestamp);
";

/// Daily SQLite partitions (`YYYY-MM-DD.db`) under a data directory.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            StorageError::Unavailable(format!("cannot create {}: {e}", data_dir.display()))
        })?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    fn open(&self, key: &str) -> Result<Connection> {
        let path = self.partition_path(key);
        let conn = Connection::open(&path).map_err(|e| {
            StorageError::Unavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(METRICS_SCHEMA)?;
        Ok(conn)
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let conn = self.open(&key)?;
            tracing::info!(partition = %key, "Created new partition");
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or_else(|| StorageError::Unavailable(format!("partition {key} not loaded")))?;
        f(conn)
    }

    /// Keys of on-disk partitions overlapping `[from, to]`, loading any that
    /// are not yet open.
    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for (date, _) in self.partition_files()? {
            if date < from.date_naive() || date > to.date_naive() {
                continue;
            }
            let key = date.format("%Y-%m-%d").to_string();
            let mut conns = self.lock_connections();
            if !conns.contains_key(&key) {
                let conn = self.open(&key)?;
                conns.insert(key.clone(), conn);
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// All partition files on disk, sorted by date.
    pub fn partition_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&self.data_dir).map_err(|e| {
            StorageError::Unavailable(format!("cannot read {}: {e}", self.data_dir.display()))
        })?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    files.push((date, entry.path()));
                }
            }
        }
        files.sort_by_key(|(date, _)| *date);
        Ok(files)
    }

    /// Deletes partitions dated strictly before `cutoff`'s day.
    pub fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_date = cutoff.date_naive();
        let expired: Vec<NaiveDate> = self
            .partition_files()?
            .into_iter()
            .map(|(date, _)| date)
            .filter(|date| *date < cutoff_date)
            .collect();
        let mut removed = 0;
        for date in expired {
            if self.remove(&date.format("%Y-%m-%d").to_string()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes every partition. Returns how many were removed, or an error
    /// naming the partitions that could not be deleted.
    pub fn remove_all(&self) -> Result<usize> {
        let mut removed = 0;
        let mut failed = Vec::new();
        for (date, _) in self.partition_files()? {
            let key = date.format("%Y-%m-%d").to_string();
            match self.remove(&key) {
                Ok(()) => removed += 1,
                Err(e) => failed.push(format!("{key}: {e}")),
            }
        }
        if !failed.is_empty() {
            return Err(StorageError::Unavailable(format!(
                "cannot remove partitions {}",
                failed.join(", ")
            )));
        }
        Ok(removed)
    }

    /// Removes one partition and its WAL/SHM files. Only failure to delete
    /// the database file itself is reported.
    fn remove(&self, key: &str) -> std::io::Result<()> {
        // Dropping the connection checkpoints the WAL before the file goes away.
        self.lock_connections().remove(key);

        let db_path = self.partition_path(key);
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::error!(partition = %key, error = %e, "Failed to remove partition file");
            return Err(e);
        }
        for suffix in ["db-wal", "db-shm"] {
            let aux = self.data_dir.join(format!("{key}.{suffix}"));
            if aux.exists() {
                if let Err(e) = std::fs::remove_file(&aux) {
                    tracing::warn!(path = %aux.display(), error = %e, "Failed to remove auxiliary file");
                }
            }
        }
        tracing::info!(partition = %key, "Removed partition");
        Ok(())
    }
}
