use crate::detectors::{
    CompositeDetector, ExponentialSmoothingDetector, MadDetector, SeasonalDetector,
    SeasonalPeriod, StatisticalDetector,
};
use crate::error::AnomalyError;
use crate::service::AnomalyDetectionService;
use crate::AnomalyDetector;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hivemon_common::events::{EventBus, HubEvent};
use hivemon_common::types::{AnomalySeverity, MetricPoint};
use hivemon_storage::error::{Result as StorageResult, StorageError};
use hivemon_storage::memory::MemoryStore;
use hivemon_storage::{MetricQuery, TimeSeriesStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Deterministic noise in [-1.0, 1.0] with a period of five samples.
fn jitter(i: usize) -> f64 {
    ((i * 7) % 5) as f64 * 0.5 - 1.0
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn series(metric: &str, values: &[f64], step: Duration) -> Vec<MetricPoint> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| MetricPoint::new(metric, *v).at(start() + step * i as i32))
        .collect()
}

fn baseline_with_spike(len: usize, spike: f64) -> Vec<MetricPoint> {
    let mut values: Vec<f64> = (0..len).map(|i| 100.0 + jitter(i)).collect();
    values.push(spike);
    series("agent.error_rate", &values, Duration::minutes(1))
}

#[test]
fn statistical_flags_outlier_with_high_severity() {
    let detector = StatisticalDetector::new(3.0, 30).unwrap();
    let points = baseline_with_spike(60, 150.0);

    let anomalies = detector.detect(&points);
    assert_eq!(anomalies.len(), 1);
    let anomaly = &anomalies[0];
    assert_eq!(anomaly.timestamp, points[60].timestamp);
    assert_eq!(anomaly.value, 150.0);
    assert!(anomaly.severity >= AnomalySeverity::High);
    assert!(anomaly.deviation_score > 5.0);
    assert!((anomaly.expected - 100.0).abs() < 1.0);
    assert_eq!(anomaly.detector, "statistical");
}

#[test]
fn statistical_needs_min_window() {
    let detector = StatisticalDetector::new(3.0, 30).unwrap();
    let points = baseline_with_spike(9, 150.0);
    assert_eq!(points.len(), 10);
    assert!(detector.detect(&points).is_empty());
}

#[test]
fn statistical_ignores_flat_series() {
    let detector = StatisticalDetector::default();
    let points = series("m", &[42.0; 40], Duration::minutes(1));
    assert!(detector.detect(&points).is_empty());
}

#[test]
fn detectors_reject_invalid_parameters() {
    assert!(matches!(
        StatisticalDetector::new(0.0, 30),
        Err(AnomalyError::InvalidParameter(_))
    ));
    assert!(StatisticalDetector::new(3.0, 1).is_err());
    assert!(MadDetector::new(-1.0, 10).is_err());
    assert!(ExponentialSmoothingDetector::new(1.0, 3.0).is_err());
    assert!(ExponentialSmoothingDetector::new(0.0, 3.0).is_err());
    assert!(SeasonalDetector::new(SeasonalPeriod::Daily, f64::NAN).is_err());
    assert!(SeasonalDetector::new(SeasonalPeriod::Daily, 3.0)
        .unwrap()
        .with_min_cycles(1)
        .is_err());
}

#[test]
fn mad_flags_spike() {
    let detector = MadDetector::default();
    let points = baseline_with_spike(30, 500.0);

    let anomalies = detector.detect(&points);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].value, 500.0);
    assert_eq!(anomalies[0].severity, AnomalySeverity::Critical);
    assert_eq!(anomalies[0].expected, 100.0);
}

#[test]
fn mad_handles_constant_baseline() {
    let detector = MadDetector::default();
    let mut values = vec![10.0; 20];
    values.push(100.0);
    let points = series("queue.depth", &values, Duration::minutes(1));

    let anomalies = detector.detect(&points);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].value, 100.0);
}

#[test]
fn mad_needs_min_window() {
    let detector = MadDetector::default();
    assert!(detector.detect(&baseline_with_spike(4, 500.0)).is_empty());
}

#[test]
fn smoothing_flags_spike_after_warmup() {
    let detector = ExponentialSmoothingDetector::new(0.3, 3.0).unwrap();
    let points = baseline_with_spike(30, 500.0);

    let anomalies = detector.detect(&points);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].timestamp, points[30].timestamp);
    assert!(anomalies[0].expected < 102.0);
    assert_eq!(anomalies[0].detector, "exponential_smoothing");
}

#[test]
fn smoothing_needs_warmup() {
    let detector = ExponentialSmoothingDetector::default();
    assert!(detector.detect(&baseline_with_spike(5, 500.0)).is_empty());
    assert!(detector.detect(&[]).is_empty());
}

#[test]
fn smoothing_is_deterministic() {
    let detector = ExponentialSmoothingDetector::default().with_warmup(5);
    let points = baseline_with_spike(20, 300.0);
    let first: Vec<_> = detector.detect(&points).iter().map(|a| a.timestamp).collect();
    let second: Vec<_> = detector.detect(&points).iter().map(|a| a.timestamp).collect();
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

/// Hourly samples: 200 during working hours (09-17), 50 at night.
fn daily_pattern(days: usize) -> Vec<f64> {
    (0..24 * days)
        .map(|i| {
            let hour = i % 24;
            let base = if (9..=17).contains(&hour) { 200.0 } else { 50.0 };
            base + jitter(i)
        })
        .collect()
}

#[test]
fn seasonal_flags_value_unusual_for_its_hour() {
    let mut values = daily_pattern(4);
    let spike = 24 * 3 + 3;
    values[spike] = 200.0;
    let points = series("queue.depth", &values, Duration::hours(1));

    let detector = SeasonalDetector::new(SeasonalPeriod::Daily, 3.0).unwrap();
    let anomalies = detector.detect(&points);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].timestamp, points[spike].timestamp);
    assert!((anomalies[0].expected - 50.0).abs() < 1.5);

    // The same value is ordinary for the series as a whole.
    let flat = StatisticalDetector::new(3.0, 30).unwrap();
    assert!(flat.detect(&points).is_empty());
}

#[test]
fn seasonal_requires_multiple_cycles() {
    let mut values = daily_pattern(2);
    values.truncate(36);
    values[30] = 200.0;
    let points = series("queue.depth", &values, Duration::hours(1));

    let detector = SeasonalDetector::new(SeasonalPeriod::Daily, 3.0).unwrap();
    assert!(detector.detect(&points).is_empty());
}

#[test]
fn seasonal_waits_for_full_baseline_cycles_with_dense_samples() {
    // Ten-minute samples: two days plus one sample, then a night-time spike.
    let step = Duration::minutes(10);
    let mut values: Vec<f64> = (0..=24 * 6 * 2)
        .map(|i| {
            let hour = (i / 6) % 24;
            let base = if (9..=17).contains(&hour) { 200.0 } else { 50.0 };
            base + jitter(i)
        })
        .collect();
    values.push(200.0);
    let points = series("queue.depth", &values, step);
    let detector = SeasonalDetector::new(SeasonalPeriod::Daily, 3.0).unwrap();

    // The baseline spans one day and ten minutes: a single full cycle.
    assert!(detector.detect(&points).is_empty());

    // A third day of history makes the same spike detectable.
    let mut values: Vec<f64> = (0..=24 * 6 * 3)
        .map(|i| {
            let hour = (i / 6) % 24;
            let base = if (9..=17).contains(&hour) { 200.0 } else { 50.0 };
            base + jitter(i)
        })
        .collect();
    values.push(200.0);
    let points = series("queue.depth", &values, step);
    let anomalies = detector.detect(&points);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].timestamp, points[points.len() - 1].timestamp);
}

#[test]
fn seasonal_lookback_covers_baseline_cycles() {
    let weekly = SeasonalDetector::new(SeasonalPeriod::Weekly, 3.0).unwrap();
    assert_eq!(weekly.lookback(), Some(Duration::weeks(4)));
    assert_eq!("weekly".parse::<SeasonalPeriod>().unwrap(), SeasonalPeriod::Weekly);
}

#[test]
fn composite_unions_without_duplicates() {
    let composite = CompositeDetector::new(vec![
        Box::new(StatisticalDetector::new(3.0, 30).unwrap()),
        Box::new(MadDetector::default()),
    ]);
    let points = baseline_with_spike(60, 150.0);

    let anomalies = composite.detect(&points);
    assert_eq!(anomalies.len(), 1);
    // MAD scores the spike far higher than the z-score does.
    assert_eq!(anomalies[0].detector, "mad");
    assert_eq!(anomalies[0].severity, AnomalySeverity::Critical);
}

#[test]
fn composite_reports_when_only_one_member_flags() {
    let mut values = daily_pattern(4);
    values[24 * 3 + 3] = 200.0;
    let points = series("queue.depth", &values, Duration::hours(1));

    let composite = CompositeDetector::new(vec![
        Box::new(StatisticalDetector::new(3.0, 30).unwrap()),
        Box::new(SeasonalDetector::new(SeasonalPeriod::Daily, 3.0).unwrap()),
    ]);
    let anomalies = composite.detect(&points);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].detector, "seasonal");
    assert_eq!(composite.lookback(), Some(Duration::days(4)));
}

#[test]
fn composite_with_no_members_finds_nothing() {
    let composite = CompositeDetector::new(Vec::new());
    assert!(composite.is_empty());
    assert!(composite.detect(&baseline_with_spike(60, 150.0)).is_empty());
}

// ---- service ----

/// Store wrapper whose reads can be switched to fail.
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(false),
        }
    }
}

impl TimeSeriesStore for FlakyStore {
    fn write(&self, point: MetricPoint) -> StorageResult<()> {
        self.inner.write(point)
    }

    fn query(&self, query: &MetricQuery) -> StorageResult<Vec<MetricPoint>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("backend offline".into()));
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

fn seed(store: &dyn TimeSeriesStore, metric: &str, now: DateTime<Utc>, spike: f64) {
    for i in 0..60usize {
        let ts = now - Duration::minutes(60 - i as i64);
        store
            .write(MetricPoint::new(metric, 100.0 + jitter(i)).at(ts))
            .unwrap();
    }
    store.write(MetricPoint::new(metric, spike).at(now)).unwrap();
}

#[tokio::test]
async fn service_records_history_and_publishes() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    seed(store.as_ref(), "agent.error_rate", now, 150.0);

    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let mut service = AnomalyDetectionService::new(store.clone())
        .with_window(Duration::hours(2))
        .with_events(bus);
    service.add_detector("agent.error_rate", Box::new(StatisticalDetector::new(3.0, 30).unwrap()));
    service.add_detector("queue.depth", Box::new(MadDetector::default()));
    assert_eq!(service.detector_count(), 2);

    let found = service.run_detection_at(now).unwrap();
    assert_eq!(found.len(), 1);
    assert!(!found[0].id.is_empty());
    assert_eq!(service.get_history("agent.error_rate").len(), 1);
    assert!(service.get_history("queue.depth").is_empty());

    match rx.try_recv().unwrap() {
        HubEvent::AnomalyDetected(anomaly) => assert_eq!(anomaly.id, found[0].id),
        other => panic!("unexpected event: {other:?}"),
    }

    // Overlapping windows do not re-report the same point.
    let again = service.run_detection_at(now + Duration::seconds(30)).unwrap();
    assert!(again.is_empty());
    assert_eq!(service.get_history("agent.error_rate").len(), 1);
}

#[test]
fn service_history_is_capped() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let mut service = AnomalyDetectionService::new(store.clone())
        .with_window(Duration::hours(2))
        .with_history_capacity(2);
    service.add_detector("m", Box::new(MadDetector::default()));

    for i in 0..60usize {
        store
            .write(MetricPoint::new("m", 100.0 + jitter(i)).at(now - Duration::minutes(60 - i as i64)))
            .unwrap();
    }
    for k in 0..3 {
        let ts = now + Duration::minutes(k);
        store.write(MetricPoint::new("m", 900.0).at(ts)).unwrap();
        service.run_detection_at(ts).unwrap();
    }

    let history = service.get_history("m");
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp < history[1].timestamp);
    assert_eq!(history[1].timestamp, now + Duration::minutes(2));
}

#[test]
fn service_remove_detector() {
    let store = Arc::new(MemoryStore::new());
    let mut service = AnomalyDetectionService::new(store);
    service.add_detector("m", Box::new(MadDetector::default()));
    assert!(service.remove_detector("m"));
    assert!(!service.remove_detector("m"));
    assert_eq!(service.detector_count(), 0);
    assert!(service.run_detection().unwrap().is_empty());
}

#[test]
fn service_propagates_storage_failure_without_touching_history() {
    let store = Arc::new(FlakyStore::new());
    let now = Utc::now();
    seed(store.as_ref(), "agent.error_rate", now, 150.0);

    let mut service =
        AnomalyDetectionService::new(store.clone()).with_window(Duration::hours(2));
    service.add_detector("agent.error_rate", Box::new(StatisticalDetector::new(3.0, 30).unwrap()));

    store.failing.store(true, Ordering::SeqCst);
    let err = service.run_detection_at(now).unwrap_err();
    assert!(matches!(err, AnomalyError::Storage(ref e) if e.is_unavailable()));
    assert!(service.get_history("agent.error_rate").is_empty());

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(service.run_detection_at(now).unwrap().len(), 1);
}
