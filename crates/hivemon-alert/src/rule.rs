use crate::error::{AlertError, Result};
use chrono::Duration;
use hivemon_common::types::{Action, Severity};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Comparison applied as `value <op> threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Equal,
    NotEqual,
}

impl FromStr for CompareOp {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" | "gt" | "greater_than" => Ok(Self::GreaterThan),
            "<" | "lt" | "less_than" => Ok(Self::LessThan),
            ">=" | "gte" | "greater_equal" => Ok(Self::GreaterEqual),
            "<=" | "lte" | "less_equal" => Ok(Self::LessEqual),
            "==" | "eq" | "equal" => Ok(Self::Equal),
            "!=" | "ne" | "not_equal" => Ok(Self::NotEqual),
            other => Err(AlertError::UnsupportedOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for CompareOp {
    type Error = AlertError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> Self {
        op.to_string()
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        };
        f.write_str(symbol)
    }
}

impl CompareOp {
    /// Returns true when `value` breaches `threshold`.
    ///
    /// # Examples
    ///
    /// ```
    /// use hivemon_alert::rule::CompareOp;
    ///
    /// assert!(CompareOp::GreaterThan.check(100.0, 50.0));
    /// assert!(!CompareOp::GreaterThan.check(50.0, 100.0));
    /// assert!(CompareOp::NotEqual.check(1.0, 0.0));
    /// ```
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::LessThan => "below",
            Self::GreaterEqual => "at or above",
            Self::LessEqual => "at or below",
            Self::Equal => "equal to",
            Self::NotEqual => "not equal to",
        }
    }
}

/// A threshold rule evaluated against the latest sample of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub severity: Severity,
    pub metric: String,
    pub operator: CompareOp,
    pub threshold: f64,
    /// Seconds a breach must persist before the alert fires.
    #[serde(default)]
    pub for_secs: u64,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Minimum seconds between repeated firing notifications.
    #[serde(default)]
    pub cooldown_secs: u64,
}

fn default_enabled() -> bool {
    true
}

/// Largest span chrono can represent in whole seconds.
const MAX_DURATION_SECS: u64 = (i64::MAX / 1000) as u64;

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECS) as i64)
}

impl AlertRule {
    /// Creates an enabled rule with no `for` window, no cooldown and no actions.
    pub fn new(
        id: impl Into<String>,
        metric: impl Into<String>,
        operator: CompareOp,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            enabled: true,
            severity,
            metric: metric.into(),
            operator,
            threshold,
            for_secs: 0,
            actions: Vec::new(),
            cooldown_secs: 0,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_for(mut self, secs: u64) -> Self {
        self.for_secs = secs;
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn for_duration(&self) -> Duration {
        secs(self.for_secs)
    }

    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    pub fn breached_by(&self, value: f64) -> bool {
        self.operator.check(value, self.threshold)
    }

    /// Checks required fields. A rule that fails validation is never registered.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| AlertError::InvalidRule {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("id is required"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name is required"));
        }
        if self.metric.trim().is_empty() {
            return Err(invalid("metric is required"));
        }
        if !self.threshold.is_finite() {
            return Err(invalid("threshold must be a finite number"));
        }
        if self.actions.iter().any(|a| a.action_type.trim().is_empty()) {
            return Err(invalid("action type is required"));
        }
        Ok(())
    }
}

/// Loosely typed rule definition as it appears in configuration files.
///
/// The operator stays a string until [`AlertRule::try_from`] so an
/// unsupported operator surfaces as [`AlertError::UnsupportedOperator`]
/// instead of a generic parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_severity")]
    pub severity: String,
    pub metric: String,
    pub operator: String,
    pub threshold: f64,
    #[serde(default)]
    pub for_secs: u64,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_severity() -> String {
    "warning".to_string()
}

impl TryFrom<RuleConfig> for AlertRule {
    type Error = AlertError;

    fn try_from(cfg: RuleConfig) -> Result<Self> {
        let operator: CompareOp = cfg.operator.parse()?;
        let severity: Severity = cfg.severity.parse().map_err(|reason| AlertError::InvalidRule {
            id: cfg.id.clone(),
            reason,
        })?;
        let rule = AlertRule {
            name: cfg.name.unwrap_or_else(|| cfg.id.clone()),
            id: cfg.id,
            description: cfg.description,
            enabled: cfg.enabled,
            severity,
            metric: cfg.metric,
            operator,
            threshold: cfg.threshold,
            for_secs: cfg.for_secs,
            actions: cfg.actions,
            cooldown_secs: cfg.cooldown_secs,
        };
        rule.validate()?;
        Ok(rule)
    }
}
