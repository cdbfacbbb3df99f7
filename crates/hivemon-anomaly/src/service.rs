use crate::error::Result;
use crate::AnomalyDetector;
use chrono::{DateTime, Duration, Utc};
use hivemon_common::events::{EventBus, HubEvent};
use hivemon_common::id::IdGenerator;
use hivemon_common::types::{Anomaly, MetricPoint};
use hivemon_storage::{MetricQuery, TimeSeriesStore};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

pub const DEFAULT_WINDOW_SECS: i64 = 3600;
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Runs one registered detector per metric and keeps a bounded history of
/// what was found.
///
/// Detection windows overlap from run to run, so the service remembers the
/// newest anomaly timestamp per metric and only records (and publishes)
/// anomalies newer than it.
pub struct AnomalyDetectionService {
    store: Arc<dyn TimeSeriesStore>,
    detectors: BTreeMap<String, Box<dyn AnomalyDetector>>,
    history: HashMap<String, VecDeque<Anomaly>>,
    high_water: HashMap<String, DateTime<Utc>>,
    window: Duration,
    history_capacity: usize,
    events: Option<EventBus>,
    ids: IdGenerator,
}

impl AnomalyDetectionService {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            detectors: BTreeMap::new(),
            history: HashMap::new(),
            high_water: HashMap::new(),
            window: Duration::seconds(DEFAULT_WINDOW_SECS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            events: None,
            ids: IdGenerator::default(),
        }
    }

    /// Sets the default detection window. Detectors may ask for more via
    /// [`AnomalyDetector::lookback`].
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Registers the detector for `metric`, replacing any previous one.
    pub fn add_detector(&mut self, metric: impl Into<String>, detector: Box<dyn AnomalyDetector>) {
        let metric = metric.into();
        tracing::debug!(metric = %metric, detector = detector.name(), "Detector registered");
        self.detectors.insert(metric, detector);
    }

    /// Removes the detector for `metric`. Its history is kept.
    pub fn remove_detector(&mut self, metric: &str) -> bool {
        self.detectors.remove(metric).is_some()
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    pub fn metrics(&self) -> Vec<&str> {
        self.detectors.keys().map(String::as_str).collect()
    }

    /// Recorded anomalies for `metric`, oldest first.
    pub fn get_history(&self, metric: &str) -> Vec<Anomaly> {
        self.history
            .get(metric)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.high_water.clear();
    }

    pub fn run_detection(&mut self) -> Result<Vec<Anomaly>> {
        self.run_detection_at(Utc::now())
    }

    /// Runs every registered detector over its window ending at `now` and
    /// returns the anomalies recorded by this run.
    ///
    /// All windows are read before any state changes, so a store failure
    /// leaves history untouched.
    pub fn run_detection_at(&mut self, now: DateTime<Utc>) -> Result<Vec<Anomaly>> {
        let _span = tracing::info_span!("anomaly_detection", detectors = self.detectors.len())
            .entered();

        let mut windows: Vec<(String, Vec<MetricPoint>)> = Vec::with_capacity(self.detectors.len());
        for (metric, detector) in &self.detectors {
            let lookback = detector
                .lookback()
                .map_or(self.window, |needed| needed.max(self.window));
            let query = MetricQuery::new(metric.clone(), now - lookback, now);
            windows.push((metric.clone(), self.store.query(&query)?));
        }

        let mut found = Vec::new();
        for (metric, points) in windows {
            let Some(detector) = self.detectors.get(&metric) else {
                continue;
            };
            let high_water = self.high_water.get(&metric).copied();
            let fresh: Vec<Anomaly> = detector
                .detect(&points)
                .into_iter()
                .filter(|a| high_water.map_or(true, |hw| a.timestamp > hw))
                .collect();
            if fresh.is_empty() {
                continue;
            }

            tracing::info!(
                metric = %metric,
                detector = detector.name(),
                count = fresh.len(),
                "Anomalies detected"
            );

            let history = self.history.entry(metric.clone()).or_default();
            for mut anomaly in fresh {
                anomaly.id = self.ids.next_id();
                self.high_water
                    .entry(metric.clone())
                    .and_modify(|hw| *hw = (*hw).max(anomaly.timestamp))
                    .or_insert(anomaly.timestamp);

                history.push_back(anomaly.clone());
                while history.len() > self.history_capacity {
                    history.pop_front();
                }
                if let Some(events) = &self.events {
                    events.publish(HubEvent::AnomalyDetected(anomaly.clone()));
                }
                found.push(anomaly);
            }
        }

        Ok(found)
    }
}
