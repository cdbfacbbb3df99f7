//! Publish/subscribe channel for alert and anomaly notifications.

use crate::types::{AlertEvent, Anomaly};
use serde::Serialize;
use tokio::sync::broadcast;

pub const TOPIC_ALERT_FIRING: &str = "alert:firing";
pub const TOPIC_ALERT_RESOLVED: &str = "alert:resolved";
pub const TOPIC_ANOMALY_DETECTED: &str = "anomaly:detected";

/// Notification published by the alerting core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", content = "payload")]
pub enum HubEvent {
    #[serde(rename = "alert:firing")]
    AlertFiring(AlertEvent),
    #[serde(rename = "alert:resolved")]
    AlertResolved(AlertEvent),
    #[serde(rename = "anomaly:detected")]
    AnomalyDetected(Anomaly),
}

impl HubEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            HubEvent::AlertFiring(_) => TOPIC_ALERT_FIRING,
            HubEvent::AlertResolved(_) => TOPIC_ALERT_RESOLVED,
            HubEvent::AnomalyDetected(_) => TOPIC_ANOMALY_DETECTED,
        }
    }
}

/// Cloneable handle over a broadcast channel. Every clone publishes into the
/// same channel, so one bus is created by the composing application and passed
/// to each engine.
///
/// # Examples
///
/// ```
/// use hivemon_common::events::EventBus;
///
/// let bus = EventBus::new(16);
/// let _rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event and returns how many subscribers received it.
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: HubEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
