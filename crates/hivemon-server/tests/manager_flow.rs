mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::{base_time, memory_manager, seed_with_spike, test_config, write_at, GatedStore};
use hivemon_alert::rule::{AlertRule, CompareOp};
use hivemon_anomaly::detectors::{CompositeDetector, MadDetector, StatisticalDetector};
use hivemon_common::events::HubEvent;
use hivemon_common::types::Severity;
use hivemon_server::config::{ManagerConfig, StorageBackend};
use hivemon_server::manager::AlertManager;
use hivemon_storage::MetricQuery;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn queue_rule() -> AlertRule {
    AlertRule::new("queue-deep", "queue.depth", CompareOp::GreaterThan, 500.0, Severity::Warning)
}

#[tokio::test]
async fn start_twice_does_not_duplicate_tasks() -> Result<()> {
    let manager = memory_manager();
    assert!(!manager.is_running());

    assert!(manager.start()?);
    assert!(!manager.start()?);
    assert_eq!(manager.scheduled_task_count(), 2);
    assert!(manager.get_stats().is_running);

    assert!(manager.stop());
    assert!(!manager.is_running());
    assert_eq!(manager.scheduled_task_count(), 0);
    assert!(!manager.get_stats().is_running);
    assert!(!manager.stop());

    // A stopped manager can be started again.
    assert!(manager.start()?);
    assert_eq!(manager.scheduled_task_count(), 2);
    manager.stop();
    Ok(())
}

#[test]
fn start_outside_runtime_fails_without_scheduling() {
    let manager = memory_manager();
    assert!(manager.start().is_err());
    assert!(!manager.is_running());
    assert_eq!(manager.scheduled_task_count(), 0);
}

#[tokio::test]
async fn stop_keeps_active_alerts() -> Result<()> {
    let manager = memory_manager();
    manager.add_rule(queue_rule())?;
    manager.record_metric("queue.depth", 800.0, None)?;

    assert_eq!(manager.evaluate_now()?.len(), 1);
    manager.start()?;
    manager.stop();

    let active = manager.get_active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_id, "queue-deep");
    assert_eq!(manager.get_stats().active_alert_count, 1);
    Ok(())
}

#[test]
fn stats_track_rules_detectors_and_fired_alerts() -> Result<()> {
    let manager = memory_manager();
    manager.add_rule(queue_rule().with_cooldown(60))?;
    manager.add_rule(AlertRule::new(
        "health-low",
        "agent.health",
        CompareOp::LessThan,
        0.5,
        Severity::Critical,
    ))?;
    manager.add_detector("queue.depth", Box::new(MadDetector::default()));

    let t0 = base_time();
    write_at(&manager, "queue.depth", 900.0, t0);
    write_at(&manager, "agent.health", 0.9, t0);
    assert_eq!(manager.evaluate_at(t0)?.len(), 1);
    // Within the cooldown: still firing, nothing new.
    write_at(&manager, "queue.depth", 950.0, t0 + Duration::seconds(30));
    assert!(manager.evaluate_at(t0 + Duration::seconds(30))?.is_empty());
    write_at(&manager, "queue.depth", 990.0, t0 + Duration::seconds(60));
    assert_eq!(manager.evaluate_at(t0 + Duration::seconds(60))?.len(), 1);

    let stats = manager.get_stats();
    assert_eq!(stats.rule_count, 2);
    assert_eq!(stats.detector_count, 1);
    assert_eq!(stats.active_alert_count, 1);
    assert_eq!(stats.total_alerts_fired, 2);
    assert!(!stats.is_running);

    // Resolution does not decrement the lifetime counter.
    write_at(&manager, "queue.depth", 10.0, t0 + Duration::seconds(90));
    manager.evaluate_at(t0 + Duration::seconds(90))?;
    let stats = manager.get_stats();
    assert_eq!(stats.active_alert_count, 0);
    assert_eq!(stats.total_alerts_fired, 2);

    let json = serde_json::to_value(stats)?;
    assert_eq!(json["total_alerts_fired"], 2);
    Ok(())
}

#[tokio::test]
async fn detection_publishes_and_keeps_history() -> Result<()> {
    let manager = memory_manager();
    manager.add_detector(
        "agent.error_rate",
        Box::new(CompositeDetector::new(vec![
            Box::new(StatisticalDetector::default()),
            Box::new(MadDetector::default()),
        ])),
    );
    let mut events = manager.subscribe();

    let now = Utc::now();
    seed_with_spike(&manager, "agent.error_rate", now, 150.0);

    let found = manager.detect_anomalies_now()?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].timestamp, now);

    let event = events.try_recv()?;
    let payload = serde_json::to_value(&event)?;
    assert_eq!(payload["topic"], "anomaly:detected");
    assert_eq!(payload["payload"]["metric"], "agent.error_rate");
    assert!(matches!(event, HubEvent::AnomalyDetected(_)));

    // The same spike is not reported twice.
    assert!(manager.detect_anomalies_now()?.is_empty());
    assert_eq!(manager.get_anomaly_history("agent.error_rate").len(), 1);
    Ok(())
}

#[tokio::test]
async fn firing_alerts_reach_subscribers() -> Result<()> {
    let manager = memory_manager();
    manager.add_rule(queue_rule())?;
    let mut events = manager.subscribe();

    let t0 = base_time();
    write_at(&manager, "queue.depth", 700.0, t0);
    manager.evaluate_at(t0)?;
    write_at(&manager, "queue.depth", 100.0, t0 + Duration::seconds(30));
    manager.evaluate_at(t0 + Duration::seconds(30))?;

    assert_eq!(events.try_recv()?.topic(), "alert:firing");
    assert_eq!(events.try_recv()?.topic(), "alert:resolved");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_evaluation_fires_rules() -> Result<()> {
    let manager = memory_manager();
    manager.add_rule(queue_rule())?;
    manager.record_metric("queue.depth", 1200.0, None)?;

    manager.start()?;
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    manager.stop();

    assert!(manager.get_stats().total_alerts_fired >= 1);
    assert_eq!(manager.get_active_alerts().len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_evaluation_skips_ticks_while_engine_is_busy() -> Result<()> {
    let store = Arc::new(GatedStore::new());
    let manager = Arc::new(AlertManager::new(test_config(), store.clone()));
    manager.add_rule(queue_rule())?;
    manager.record_metric("queue.depth", 1200.0, None)?;

    // A manual evaluation holds the engine until the store is opened.
    store.close();
    let busy = manager.clone();
    let manual = std::thread::spawn(move || busy.evaluate_now().map(|fired| fired.len()));
    while store.reads() == 0 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    manager.start()?;
    tokio::time::sleep(StdDuration::from_millis(2500)).await;
    manager.stop();

    // Scheduled ticks found the engine locked and never reached the store.
    assert_eq!(store.reads(), 1);
    assert_eq!(manager.get_stats().total_alerts_fired, 0);

    store.open();
    let fired = manual.join().map_err(|_| anyhow::anyhow!("manual evaluation panicked"))??;
    assert_eq!(fired, 1);
    assert_eq!(manager.get_stats().total_alerts_fired, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_detection_publishes_anomalies() -> Result<()> {
    let manager = memory_manager();
    manager.add_detector(
        "agent.error_rate",
        Box::new(CompositeDetector::new(vec![
            Box::new(StatisticalDetector::default()),
            Box::new(MadDetector::default()),
        ])),
    );
    let mut events = manager.subscribe();
    seed_with_spike(&manager, "agent.error_rate", Utc::now(), 150.0);

    manager.start()?;
    let event = tokio::time::timeout(StdDuration::from_secs(5), events.recv()).await??;
    manager.stop();

    match event {
        HubEvent::AnomalyDetected(anomaly) => {
            assert_eq!(anomaly.metric, "agent.error_rate");
            assert_eq!(anomaly.value, 150.0);
        }
        other => panic!("expected an anomaly event, got {other:?}"),
    }
    assert_eq!(manager.get_anomaly_history("agent.error_rate").len(), 1);
    Ok(())
}

#[test]
fn default_rules_fire_for_unhealthy_agents() -> Result<()> {
    let manager = memory_manager();
    assert_eq!(manager.setup_default_rules()?, 4);
    assert_eq!(manager.setup_default_detectors()?, 3);

    let t0 = base_time();
    write_at(&manager, "agent.health", 0.2, t0);
    assert!(manager.evaluate_at(t0)?.is_empty());
    write_at(&manager, "agent.health", 0.1, t0 + Duration::seconds(60));
    let fired = manager.evaluate_at(t0 + Duration::seconds(60))?;

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].rule_id, "agent-health-degraded");
    assert_eq!(fired[0].severity, Severity::Critical);
    Ok(())
}

#[test]
fn record_metric_keeps_labels() -> Result<()> {
    let manager = memory_manager();
    let mut labels = HashMap::new();
    labels.insert("agent".to_string(), "worker-7".to_string());
    manager.record_metric("agent.error_rate", 0.05, Some(labels.clone()))?;
    manager.record_metric("agent.error_rate", 0.07, None)?;

    let now = Utc::now();
    let query = MetricQuery::new("agent.error_rate", now - Duration::minutes(1), now)
        .with_labels(labels);
    let points = manager.store().query(&query)?;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 0.05);
    Ok(())
}

#[test]
fn reset_clears_data_but_keeps_configuration() -> Result<()> {
    let manager = memory_manager();
    manager.add_rule(queue_rule())?;
    manager.add_detector("agent.error_rate", Box::new(StatisticalDetector::default()));

    let now = Utc::now();
    seed_with_spike(&manager, "agent.error_rate", now, 150.0);
    write_at(&manager, "queue.depth", 900.0, now);
    manager.evaluate_at(now)?;
    manager.detect_anomalies_at(now)?;

    manager.reset()?;

    let stats = manager.get_stats();
    assert_eq!(stats.active_alert_count, 0);
    assert_eq!(stats.rule_count, 1);
    assert_eq!(stats.detector_count, 1);
    assert_eq!(stats.total_alerts_fired, 1);
    assert!(manager.get_anomaly_history("agent.error_rate").is_empty());
    assert!(manager.store().metric_names()?.is_empty());
    Ok(())
}

#[test]
fn from_config_seeds_defaults_on_sqlite() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config: ManagerConfig = toml::from_str(
        r#"
        [storage]
        backend = "sqlite"

        [[rules]]
        id = "cost-spike"
        metric = "agent.cost_usd"
        operator = "gt"
        threshold = 25.0
        severity = "critical"
        "#,
    )?;
    config.storage.data_dir = dir.path().to_string_lossy().into_owned();
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);

    let manager = AlertManager::from_config(config)?;
    let stats = manager.get_stats();
    assert_eq!(stats.rule_count, 5);
    assert_eq!(stats.detector_count, 3);

    let t0 = base_time();
    write_at(&manager, "agent.cost_usd", 40.0, t0);
    let fired = manager.evaluate_at(t0)?;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].rule_id, "cost-spike");
    Ok(())
}

#[test]
fn from_config_rejects_unsupported_operator() {
    let mut config = test_config();
    config.rules = vec![toml::from_str(
        r#"
        id = "bad"
        metric = "queue.depth"
        operator = "=~"
        threshold = 1.0
        "#,
    )
    .unwrap()];
    assert!(AlertManager::from_config(config).is_err());
}
