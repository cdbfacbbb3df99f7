#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use hivemon_common::types::MetricPoint;
use hivemon_server::config::ManagerConfig;
use hivemon_server::manager::AlertManager;
use hivemon_storage::error::Result as StorageResult;
use hivemon_storage::memory::MemoryStore;
use hivemon_storage::{MetricQuery, TimeSeriesStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// One-second schedules and no seeded rules or detectors.
pub fn test_config() -> ManagerConfig {
    ManagerConfig {
        evaluation_interval_secs: 1,
        anomaly_interval_secs: 1,
        seed_default_rules: false,
        seed_default_detectors: false,
        ..ManagerConfig::default()
    }
}

pub fn memory_manager() -> AlertManager {
    AlertManager::new(test_config(), Arc::new(MemoryStore::new()))
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

pub fn write_at(manager: &AlertManager, metric: &str, value: f64, at: DateTime<Utc>) {
    manager
        .store()
        .write(MetricPoint::new(metric, value).at(at))
        .unwrap();
}

/// Sixty stable samples one minute apart ending just before `now`, then
/// `spike` at `now`.
pub fn seed_with_spike(manager: &AlertManager, metric: &str, now: DateTime<Utc>, spike: f64) {
    for i in 0..60i64 {
        let jitter = ((i * 7) % 5) as f64 * 0.5 - 1.0;
        write_at(manager, metric, 100.0 + jitter, now - Duration::minutes(60 - i));
    }
    write_at(manager, metric, spike, now);
}

/// In-memory store whose reads block while the gate is closed.
pub struct GatedStore {
    inner: MemoryStore,
    closed: AtomicBool,
    reads: AtomicUsize,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            closed: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Number of queries that have reached the store.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TimeSeriesStore for GatedStore {
    fn write(&self, point: MetricPoint) -> StorageResult<()> {
        self.inner.write(point)
    }

    fn query(&self, query: &MetricQuery) -> StorageResult<Vec<MetricPoint>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        while self.closed.load(Ordering::SeqCst) {
            std::thread::sleep(StdDuration::from_millis(5));
        }
        self.inner.query(query)
    }

    fn metric_names(&self) -> StorageResult<Vec<String>> {
        self.inner.metric_names()
    }

    fn clear(&self) -> StorageResult<()> {
        self.inner.clear()
    }

    fn cleanup(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup(cutoff)
    }
}
