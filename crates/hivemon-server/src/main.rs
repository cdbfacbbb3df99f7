use anyhow::Result;
use chrono::Utc;
use hivemon_common::events::HubEvent;
use hivemon_server::config::ManagerConfig;
use hivemon_server::manager::AlertManager;
use hivemon_server::scheduler::PeriodicTask;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  hivemon-server [config.toml]    Start the alerting service");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hivemon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1).map(|s| s.as_str()) {
        Some("-h") | Some("--help") => {
            print_usage();
            return Ok(());
        }
        Some(path) => ManagerConfig::load(path)?,
        None => {
            tracing::info!("No config file given, using defaults");
            ManagerConfig::default()
        }
    };

    let retention_days = config.storage.retention_days;
    let cleanup_interval = Duration::from_secs(config.storage.cleanup_interval_secs);
    let manager = AlertManager::from_config(config)?;

    // Event log sink
    let mut events = manager.subscribe();
    let event_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Periodic retention cleanup
    let cleanup_store = manager.store().clone();
    let cleanup_task = PeriodicTask::spawn("retention_cleanup", cleanup_interval, move || {
        let store = cleanup_store.clone();
        async move {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
            let run = tokio::task::spawn_blocking(move || store.cleanup(cutoff));
            match run.await {
                Ok(Ok(removed)) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up expired metric data")
                }
                Ok(Err(e)) => tracing::error!(error = %e, "Cleanup failed"),
                Err(e) => tracing::error!(error = %e, "Cleanup task failed"),
                _ => {}
            }
        }
    });

    manager.start()?;
    let stats = manager.get_stats();
    tracing::info!(
        rules = stats.rule_count,
        detectors = stats.detector_count,
        "Server started"
    );

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    manager.stop();
    cleanup_task.stop();
    event_handle.abort();
    tracing::info!(
        total_alerts_fired = manager.get_stats().total_alerts_fired,
        "Server stopped"
    );

    Ok(())
}

fn log_event(event: &HubEvent) {
    match event {
        HubEvent::AlertFiring(alert) => tracing::info!(
            topic = event.topic(),
            rule_id = %alert.rule_id,
            severity = %alert.severity,
            value = alert.value,
            "{}",
            alert.message
        ),
        HubEvent::AlertResolved(alert) => tracing::info!(
            topic = event.topic(),
            rule_id = %alert.rule_id,
            "{}",
            alert.message
        ),
        HubEvent::AnomalyDetected(anomaly) => tracing::info!(
            topic = event.topic(),
            metric = %anomaly.metric,
            detector = %anomaly.detector,
            severity = %anomaly.severity,
            value = anomaly.value,
            expected = anomaly.expected,
            score = anomaly.deviation_score,
            "Anomaly detected"
        ),
    }
}
