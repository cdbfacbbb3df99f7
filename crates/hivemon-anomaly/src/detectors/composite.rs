use crate::AnomalyDetector;
use chrono::{DateTime, Duration, Utc};
use hivemon_common::types::{Anomaly, MetricPoint};
use std::collections::BTreeMap;

/// Runs several detectors over the same series and unions their findings.
///
/// When more than one member flags the same timestamp only the most severe
/// anomaly is kept (ties go to the larger deviation score, then to the
/// earlier member).
pub struct CompositeDetector {
    members: Vec<Box<dyn AnomalyDetector>>,
}

impl CompositeDetector {
    pub fn new(members: Vec<Box<dyn AnomalyDetector>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, detector: Box<dyn AnomalyDetector>) {
        self.members.push(detector);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl AnomalyDetector for CompositeDetector {
    fn name(&self) -> &str {
        "composite"
    }

    fn detect(&self, points: &[MetricPoint]) -> Vec<Anomaly> {
        let mut merged: BTreeMap<DateTime<Utc>, Anomaly> = BTreeMap::new();
        for member in &self.members {
            for anomaly in member.detect(points) {
                match merged.get(&anomaly.timestamp) {
                    Some(kept) if !outranks(&anomaly, kept) => {}
                    _ => {
                        merged.insert(anomaly.timestamp, anomaly);
                    }
                }
            }
        }
        merged.into_values().collect()
    }

    fn lookback(&self) -> Option<Duration> {
        self.members.iter().filter_map(|m| m.lookback()).max()
    }
}

fn outranks(candidate: &Anomaly, kept: &Anomaly) -> bool {
    candidate.severity > kept.severity
        || (candidate.severity == kept.severity && candidate.deviation_score > kept.deviation_score)
}
