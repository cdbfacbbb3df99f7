use crate::config::{ManagerConfig, StorageBackend};
use crate::defaults;
use crate::scheduler::PeriodicTask;
use chrono::{DateTime, Utc};
use hivemon_alert::engine::{ActiveAlertState, AlertRuleEngine, EvaluationReport};
use hivemon_alert::error::Result as AlertResult;
use hivemon_alert::rule::AlertRule;
use hivemon_anomaly::error::Result as AnomalyResult;
use hivemon_anomaly::service::AnomalyDetectionService;
use hivemon_anomaly::AnomalyDetector;
use hivemon_common::events::{EventBus, HubEvent};
use hivemon_common::id::IdGenerator;
use hivemon_common::types::{AlertEvent, Anomaly};
use hivemon_storage::engine::SqliteStore;
use hivemon_storage::error::Result as StorageResult;
use hivemon_storage::memory::MemoryStore;
use hivemon_storage::TimeSeriesStore;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Aggregate counters reported by [`AlertManager::get_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub active_alert_count: usize,
    pub rule_count: usize,
    pub detector_count: usize,
    /// Lifetime number of firing alerts, including cooldown re-fires.
    pub total_alerts_fired: u64,
    pub is_running: bool,
}

/// Owns the rule engine and the anomaly service and drives both on their
/// own schedules.
///
/// Each engine sits behind its own mutex. A scheduled tick that finds the
/// previous run of its kind still holding the lock is skipped, so runs of
/// one kind never overlap. The manual `*_now` entry points wait for the lock
/// instead.
pub struct AlertManager {
    config: ManagerConfig,
    store: Arc<dyn TimeSeriesStore>,
    rules: Arc<Mutex<AlertRuleEngine>>,
    anomalies: Arc<Mutex<AnomalyDetectionService>>,
    events: EventBus,
    total_alerts_fired: Arc<AtomicU64>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl AlertManager {
    /// Builds a manager over `store` with no rules or detectors registered.
    pub fn new(config: ManagerConfig, store: Arc<dyn TimeSeriesStore>) -> Self {
        let events = EventBus::new(config.event_channel_capacity);
        let rules = AlertRuleEngine::new(store.clone())
            .with_lookback(chrono::Duration::seconds(secs_i64(config.rule_lookback_secs)))
            .with_events(events.clone())
            .with_id_generator(IdGenerator::new(1, 1));
        let anomalies = AnomalyDetectionService::new(store.clone())
            .with_window(chrono::Duration::seconds(secs_i64(config.detection_window_secs)))
            .with_history_capacity(config.anomaly_history_capacity)
            .with_events(events.clone())
            .with_id_generator(IdGenerator::new(1, 2));

        Self {
            config,
            store,
            rules: Arc::new(Mutex::new(rules)),
            anomalies: Arc::new(Mutex::new(anomalies)),
            events,
            total_alerts_fired: Arc::new(AtomicU64::new(0)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Builds the configured store, then seeds default and configured rules
    /// and detectors.
    pub fn from_config(config: ManagerConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn TimeSeriesStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Sqlite => Arc::new(SqliteStore::new(Path::new(&config.storage.data_dir))?),
        };
        let extra_rules = config.rules.clone();
        let seed_rules = config.seed_default_rules;
        let seed_detectors = config.seed_default_detectors;

        let manager = Self::new(config, store);
        if seed_rules {
            manager.setup_default_rules()?;
        }
        if seed_detectors {
            manager.setup_default_detectors()?;
        }
        {
            let mut engine = lock(&manager.rules);
            for rule in extra_rules {
                engine.add_rule_config(rule)?;
            }
        }
        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TimeSeriesStore> {
        &self.store
    }

    /// Starts the evaluation and detection schedules. Returns `Ok(false)`,
    /// and schedules nothing, if they are already running. Fails when called
    /// outside a tokio runtime.
    pub fn start(&self) -> anyhow::Result<bool> {
        if tokio::runtime::Handle::try_current().is_err() {
            anyhow::bail!("alert manager must be started from within a tokio runtime");
        }
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            tracing::debug!("Alert manager already running");
            return Ok(false);
        }

        let rules = self.rules.clone();
        let fired = self.total_alerts_fired.clone();
        tasks.push(PeriodicTask::spawn(
            "rule_evaluation",
            Duration::from_secs(self.config.evaluation_interval_secs),
            move || {
                let rules = rules.clone();
                let fired = fired.clone();
                async move {
                    let run = tokio::task::spawn_blocking(move || scheduled_evaluation(&rules, &fired));
                    if let Err(e) = run.await {
                        tracing::error!(error = %e, "Rule evaluation task failed");
                    }
                }
            },
        ));

        let anomalies = self.anomalies.clone();
        tasks.push(PeriodicTask::spawn(
            "anomaly_detection",
            Duration::from_secs(self.config.anomaly_interval_secs),
            move || {
                let anomalies = anomalies.clone();
                async move {
                    let run = tokio::task::spawn_blocking(move || scheduled_detection(&anomalies));
                    if let Err(e) = run.await {
                        tracing::error!(error = %e, "Anomaly detection task failed");
                    }
                }
            },
        ));

        tracing::info!(
            evaluation_interval_secs = self.config.evaluation_interval_secs,
            anomaly_interval_secs = self.config.anomaly_interval_secs,
            "Alert manager started"
        );
        Ok(true)
    }

    /// Cancels both schedules. Active alerts and anomaly history are kept
    /// for the next [`start`](Self::start). Returns false if not running.
    pub fn stop(&self) -> bool {
        let stopped: Vec<PeriodicTask> = lock(&self.tasks).drain(..).collect();
        if stopped.is_empty() {
            return false;
        }
        for task in stopped {
            task.stop();
        }
        tracing::info!("Alert manager stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        !lock(&self.tasks).is_empty()
    }

    pub fn scheduled_task_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn setup_default_rules(&self) -> AlertResult<usize> {
        let mut engine = lock(&self.rules);
        let rules = defaults::default_rules();
        let count = rules.len();
        for rule in rules {
            engine.add_rule(rule)?;
        }
        tracing::info!(count, "Default alert rules registered");
        Ok(count)
    }

    pub fn setup_default_detectors(&self) -> AnomalyResult<usize> {
        let detectors = defaults::default_detectors()?;
        let count = detectors.len();
        let mut service = lock(&self.anomalies);
        for (metric, detector) in detectors {
            service.add_detector(metric, detector);
        }
        tracing::info!(count, "Default anomaly detectors registered");
        Ok(count)
    }

    pub fn add_rule(&self, rule: AlertRule) -> AlertResult<()> {
        lock(&self.rules).add_rule(rule)
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        lock(&self.rules).remove_rule(id)
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        lock(&self.rules).get_all_rules().into_iter().cloned().collect()
    }

    pub fn add_detector(&self, metric: &str, detector: Box<dyn AnomalyDetector>) {
        lock(&self.anomalies).add_detector(metric, detector);
    }

    pub fn remove_detector(&self, metric: &str) -> bool {
        lock(&self.anomalies).remove_detector(metric)
    }

    /// Records a sample stamped with the current time.
    pub fn record_metric(
        &self,
        metric: &str,
        value: f64,
        labels: Option<HashMap<String, String>>,
    ) -> StorageResult<()> {
        self.store.record(metric, value, labels, None)
    }

    pub fn evaluate_now(&self) -> AlertResult<Vec<AlertEvent>> {
        self.evaluate_at(Utc::now())
    }

    /// Evaluates all rules as of `now`, waiting for any run in progress.
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> AlertResult<Vec<AlertEvent>> {
        let report = lock(&self.rules).evaluate(now)?;
        Ok(record_report(report, &self.total_alerts_fired))
    }

    pub fn detect_anomalies_now(&self) -> AnomalyResult<Vec<Anomaly>> {
        self.detect_anomalies_at(Utc::now())
    }

    pub fn detect_anomalies_at(&self, now: DateTime<Utc>) -> AnomalyResult<Vec<Anomaly>> {
        lock(&self.anomalies).run_detection_at(now)
    }

    pub fn get_active_alerts(&self) -> Vec<ActiveAlertState> {
        lock(&self.rules).get_active_alerts()
    }

    pub fn get_anomaly_history(&self, metric: &str) -> Vec<Anomaly> {
        lock(&self.anomalies).get_history(metric)
    }

    pub fn get_stats(&self) -> ManagerStats {
        let (active_alert_count, rule_count) = {
            let engine = lock(&self.rules);
            (engine.active_alert_count(), engine.rule_count())
        };
        ManagerStats {
            active_alert_count,
            rule_count,
            detector_count: lock(&self.anomalies).detector_count(),
            total_alerts_fired: self.total_alerts_fired.load(Ordering::Relaxed),
            is_running: self.is_running(),
        }
    }

    /// Clears stored samples, active alerts and anomaly history. Rules,
    /// detectors, the schedules and the lifetime fired counter are kept.
    pub fn reset(&self) -> StorageResult<()> {
        self.store.clear()?;
        lock(&self.rules).clear_state();
        lock(&self.anomalies).clear_history();
        tracing::info!("Alert manager state reset");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Takes the lock only if no other run holds it.
fn try_lock<'a, T>(mutex: &'a Mutex<T>, task: &str) -> Option<MutexGuard<'a, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => {
            tracing::debug!(task, "Previous run still in flight, tick skipped");
            None
        }
    }
}

fn secs_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000)
}

fn record_report(report: EvaluationReport, fired: &AtomicU64) -> Vec<AlertEvent> {
    fired.fetch_add(report.fired.len() as u64, Ordering::Relaxed);
    if report.action_failures > 0 {
        tracing::warn!(failures = report.action_failures, "Some alert actions failed");
    }
    report.fired
}

fn scheduled_evaluation(rules: &Mutex<AlertRuleEngine>, fired: &AtomicU64) {
    let Some(mut engine) = try_lock(rules, "rule_evaluation") else {
        return;
    };
    match engine.evaluate(Utc::now()) {
        Ok(report) => {
            record_report(report, fired);
        }
        Err(e) => tracing::warn!(error = %e, "Scheduled rule evaluation failed"),
    }
}

fn scheduled_detection(anomalies: &Mutex<AnomalyDetectionService>) {
    let Some(mut service) = try_lock(anomalies, "anomaly_detection") else {
        return;
    };
    if let Err(e) = service.run_detection() {
        tracing::warn!(error = %e, "Scheduled anomaly detection failed");
    }
}
