use crate::action::{ActionHandler, ActionRegistry};
use crate::error::Result;
use crate::rule::{AlertRule, RuleConfig};
use chrono::{DateTime, Duration, Utc};
use hivemon_common::events::{EventBus, HubEvent};
use hivemon_common::id::IdGenerator;
use hivemon_common::types::{format_labels, AlertEvent, AlertStatus, MetricPoint};
use hivemon_storage::{MetricQuery, TimeSeriesStore};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const DEFAULT_LOOKBACK_SECS: i64 = 300;

/// Transient state of a rule whose most recent evaluation observed a breach.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveAlertState {
    pub rule_id: String,
    pub status: AlertStatus,
    pub first_breach_at: DateTime<Utc>,
    /// `None` while the alert is still pending.
    pub last_fired_at: Option<DateTime<Utc>>,
    pub current_value: f64,
    pub labels: HashMap<String, String>,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Default, Clone)]
pub struct EvaluationReport {
    /// Alerts that fired in this pass, including cooldown re-fires.
    pub fired: Vec<AlertEvent>,
    /// Firing alerts cleared in this pass.
    pub resolved: Vec<AlertEvent>,
    /// Actions that returned an error. They never abort evaluation.
    pub action_failures: usize,
}

/// Rule registry plus the per-rule pending/firing state machine.
///
/// Each enabled rule is checked against the newest sample of its metric
/// within the lookback window. A breach that lasts `for_secs` fires; while it
/// continues, the alert re-fires at most once per `cooldown_secs`. The first
/// non-breaching sample clears the state.
pub struct AlertRuleEngine {
    store: Arc<dyn TimeSeriesStore>,
    rules: BTreeMap<String, AlertRule>,
    active: HashMap<String, ActiveAlertState>,
    lookback: Duration,
    events: Option<EventBus>,
    actions: ActionRegistry,
    ids: IdGenerator,
}

impl AlertRuleEngine {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            rules: BTreeMap::new(),
            active: HashMap::new(),
            lookback: Duration::seconds(DEFAULT_LOOKBACK_SECS),
            events: None,
            actions: ActionRegistry::default(),
            ids: IdGenerator::default(),
        }
    }

    /// Sets how far back evaluation looks for a rule's latest sample. A rule
    /// with no sample in this window keeps its current state.
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn register_action(&mut self, handler: Box<dyn ActionHandler>) {
        self.actions.register(handler);
    }

    /// Validates and registers `rule`. A rule with an existing id replaces it
    /// and starts with a clean state.
    pub fn add_rule(&mut self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        for action in &rule.actions {
            if !self.actions.has_handler(&action.action_type) {
                tracing::warn!(
                    rule_id = %rule.id,
                    action_type = %action.action_type,
                    "Rule references an action type with no handler"
                );
            }
        }
        let id = rule.id.clone();
        self.active.remove(&id);
        if self.rules.insert(id.clone(), rule).is_some() {
            tracing::debug!(rule_id = %id, "Alert rule replaced");
        }
        Ok(())
    }

    /// Converts and registers a rule from its configuration form.
    pub fn add_rule_config(&mut self, config: RuleConfig) -> Result<()> {
        self.add_rule(AlertRule::try_from(config)?)
    }

    /// Removes the rule and its active state. Returns true if it existed.
    pub fn remove_rule(&mut self, id: &str) -> bool {
        self.active.remove(id);
        self.rules.remove(id).is_some()
    }

    pub fn get_rule(&self, id: &str) -> Option<&AlertRule> {
        self.rules.get(id)
    }

    /// All rules ordered by id.
    pub fn get_all_rules(&self) -> Vec<&AlertRule> {
        self.rules.values().collect()
    }

    /// Enables or disables a rule. Disabling drops its active state silently.
    /// Returns false if the rule does not exist.
    pub fn set_rule_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let Some(rule) = self.rules.get_mut(id) else {
            return false;
        };
        rule.enabled = enabled;
        if !enabled {
            self.active.remove(id);
        }
        true
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Snapshot of every pending or firing alert, ordered by rule id.
    pub fn get_active_alerts(&self) -> Vec<ActiveAlertState> {
        let mut alerts: Vec<ActiveAlertState> = self.active.values().cloned().collect();
        alerts.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        alerts
    }

    pub fn active_alert_count(&self) -> usize {
        self.active.len()
    }

    /// Drops all active state. Rules are kept.
    pub fn clear_state(&mut self) {
        self.active.clear();
    }

    pub fn evaluate_rules(&mut self) -> Result<Vec<AlertEvent>> {
        self.evaluate_rules_at(Utc::now())
    }

    /// Evaluates every enabled rule as of `now` and returns the alerts that
    /// fired.
    pub fn evaluate_rules_at(&mut self, now: DateTime<Utc>) -> Result<Vec<AlertEvent>> {
        Ok(self.evaluate(now)?.fired)
    }

    /// Full evaluation pass as of `now`.
    ///
    /// Samples for every enabled rule are read before any state changes, so a
    /// store failure returns an error and leaves all rule state as it was.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Result<EvaluationReport> {
        let _span = tracing::info_span!("rule_evaluation", rules = self.rules.len()).entered();

        let mut samples: Vec<(String, MetricPoint)> = Vec::new();
        for rule in self.rules.values().filter(|r| r.enabled) {
            let query = MetricQuery::new(rule.metric.clone(), now - self.lookback, now);
            if let Some(sample) = self.store.latest(&query)? {
                samples.push((rule.id.clone(), sample));
            }
        }

        let mut report = EvaluationReport::default();
        for (rule_id, sample) in samples {
            let Some(rule) = self.rules.get(&rule_id) else {
                continue;
            };

            if !rule.breached_by(sample.value) {
                if let Some(previous) = self.active.remove(&rule_id) {
                    if previous.status == AlertStatus::Firing {
                        let event = self.build_event(
                            rule,
                            &sample,
                            previous.first_breach_at,
                            AlertStatus::Resolved,
                            now,
                        );
                        tracing::info!(rule_id = %rule.id, value = sample.value, "Alert resolved");
                        self.publish(HubEvent::AlertResolved(event.clone()));
                        report.resolved.push(event);
                    } else {
                        tracing::debug!(rule_id = %rule.id, "Pending alert cleared");
                    }
                }
                continue;
            }

            let first_breach_at = match self.active.entry(rule_id) {
                Entry::Vacant(slot) => {
                    let firing = rule.for_secs == 0;
                    slot.insert(ActiveAlertState {
                        rule_id: rule.id.clone(),
                        status: if firing {
                            AlertStatus::Firing
                        } else {
                            AlertStatus::Pending
                        },
                        first_breach_at: now,
                        last_fired_at: firing.then_some(now),
                        current_value: sample.value,
                        labels: sample.labels.clone(),
                    });
                    if !firing {
                        tracing::debug!(rule_id = %rule.id, value = sample.value, "Alert pending");
                    }
                    firing.then_some(now)
                }
                Entry::Occupied(mut slot) => {
                    let state = slot.get_mut();
                    state.current_value = sample.value;
                    state.labels = sample.labels.clone();
                    match state.status {
                        AlertStatus::Firing => {
                            let cooled = state
                                .last_fired_at
                                .map_or(true, |last| now - last >= rule.cooldown());
                            if cooled {
                                state.last_fired_at = Some(now);
                                Some(state.first_breach_at)
                            } else {
                                tracing::debug!(rule_id = %rule.id, "Alert suppressed (cooldown)");
                                None
                            }
                        }
                        AlertStatus::Pending | AlertStatus::Resolved => {
                            if now - state.first_breach_at >= rule.for_duration() {
                                state.status = AlertStatus::Firing;
                                state.last_fired_at = Some(now);
                                Some(state.first_breach_at)
                            } else {
                                None
                            }
                        }
                    }
                }
            };

            let Some(first_breach_at) = first_breach_at else {
                continue;
            };
            let event = self.build_event(rule, &sample, first_breach_at, AlertStatus::Firing, now);
            tracing::info!(
                rule_id = %rule.id,
                severity = %rule.severity,
                value = sample.value,
                "Alert firing"
            );
            self.publish(HubEvent::AlertFiring(event.clone()));
            report.action_failures += self.run_actions(rule, &event);
            report.fired.push(event);
        }

        Ok(report)
    }

    fn build_event(
        &self,
        rule: &AlertRule,
        sample: &MetricPoint,
        first_breach_at: DateTime<Utc>,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> AlertEvent {
        let labels = format_labels(&sample.labels);
        let labels = if labels.is_empty() {
            labels
        } else {
            format!("{{{labels}}}")
        };
        let message = match status {
            AlertStatus::Resolved => format!(
                "{}: {}{labels} recovered at {:.2} (threshold {} {})",
                rule.name, rule.metric, sample.value, rule.operator, rule.threshold
            ),
            _ => format!(
                "{}: {}{labels} is {:.2}, {} threshold {}",
                rule.name,
                rule.metric,
                sample.value,
                rule.operator.describe(),
                rule.threshold
            ),
        };
        AlertEvent {
            id: self.ids.next_id(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            metric: rule.metric.clone(),
            severity: rule.severity,
            status,
            message,
            value: sample.value,
            threshold: rule.threshold,
            timestamp: now,
            first_breach_at,
            labels: sample.labels.clone(),
        }
    }

    fn publish(&self, event: HubEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Runs each configured action, isolating failures. Returns how many failed.
    fn run_actions(&self, rule: &AlertRule, alert: &AlertEvent) -> usize {
        let mut failures = 0;
        for action in &rule.actions {
            if let Err(e) = self.actions.dispatch(action, alert) {
                failures += 1;
                tracing::warn!(
                    rule_id = %rule.id,
                    action_type = %action.action_type,
                    error = %e,
                    "Alert action failed"
                );
            }
        }
        failures
    }
}
