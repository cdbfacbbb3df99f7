use hivemon_alert::rule::{AlertRule, CompareOp};
use hivemon_anomaly::detectors::{
    CompositeDetector, ExponentialSmoothingDetector, MadDetector, SeasonalDetector,
    SeasonalPeriod, StatisticalDetector,
};
use hivemon_anomaly::error::Result;
use hivemon_anomaly::AnomalyDetector;
use hivemon_common::types::{Action, Severity};

pub const METRIC_ERROR_RATE: &str = "agent.error_rate";
pub const METRIC_QUEUE_DEPTH: &str = "queue.depth";
pub const METRIC_AGENT_HEALTH: &str = "agent.health";

/// Baseline rule definitions seeded on startup.
struct RuleDef {
    id: &'static str,
    name: &'static str,
    metric: &'static str,
    operator: CompareOp,
    threshold: f64,
    severity: Severity,
    for_secs: u64,
    cooldown_secs: u64,
}

const DEFAULT_RULES: &[RuleDef] = &[
    // ---- Errors ----
    RuleDef {
        id: "agent-error-rate-critical",
        name: "Agent error rate critical",
        metric: METRIC_ERROR_RATE,
        operator: CompareOp::GreaterThan,
        threshold: 0.25,
        severity: Severity::Critical,
        for_secs: 0,
        cooldown_secs: 300,
    },
    RuleDef {
        id: "agent-error-rate-high",
        name: "Agent error rate high",
        metric: METRIC_ERROR_RATE,
        operator: CompareOp::GreaterThan,
        threshold: 0.1,
        severity: Severity::Warning,
        for_secs: 60,
        cooldown_secs: 600,
    },
    // ---- Queue ----
    RuleDef {
        id: "queue-depth-high",
        name: "Task queue backing up",
        metric: METRIC_QUEUE_DEPTH,
        operator: CompareOp::GreaterThan,
        threshold: 1000.0,
        severity: Severity::Warning,
        for_secs: 120,
        cooldown_secs: 600,
    },
    // ---- Health ----
    RuleDef {
        id: "agent-health-degraded",
        name: "Agent health degraded",
        metric: METRIC_AGENT_HEALTH,
        operator: CompareOp::LessThan,
        threshold: 0.5,
        severity: Severity::Critical,
        for_secs: 60,
        cooldown_secs: 300,
    },
];

/// Default rules, each with a `log` action.
pub fn default_rules() -> Vec<AlertRule> {
    DEFAULT_RULES
        .iter()
        .map(|def| {
            AlertRule::new(def.id, def.metric, def.operator, def.threshold, def.severity)
                .named(def.name)
                .with_for(def.for_secs)
                .with_cooldown(def.cooldown_secs)
                .with_action(Action::new("log"))
        })
        .collect()
}

/// Default detectors keyed by metric.
///
/// Error rate uses a z-score and MAD ensemble. Queue depth follows the
/// daily load pattern, so it pairs a seasonal baseline with exponential
/// smoothing. Health scores are bounded and spiky, which suits MAD alone.
pub fn default_detectors() -> Result<Vec<(&'static str, Box<dyn AnomalyDetector>)>> {
    let error_rate = CompositeDetector::new(vec![
        Box::new(StatisticalDetector::default()),
        Box::new(MadDetector::default()),
    ]);
    let queue_depth = CompositeDetector::new(vec![
        Box::new(SeasonalDetector::new(SeasonalPeriod::Daily, 3.0)?),
        Box::new(ExponentialSmoothingDetector::default()),
    ]);
    let health = MadDetector::new(4.0, 10)?;

    let detectors: Vec<(&'static str, Box<dyn AnomalyDetector>)> = vec![
        (METRIC_ERROR_RATE, Box::new(error_rate) as Box<dyn AnomalyDetector>),
        (METRIC_QUEUE_DEPTH, Box::new(queue_depth) as Box<dyn AnomalyDetector>),
        (METRIC_AGENT_HEALTH, Box::new(health) as Box<dyn AnomalyDetector>),
    ];
    Ok(detectors)
}
