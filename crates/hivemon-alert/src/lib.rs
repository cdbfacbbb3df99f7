//! Threshold alerting over metric series.
//!
//! Rules ([`rule::AlertRule`]) compare the newest sample of a metric against
//! a threshold. The [`engine::AlertRuleEngine`] owns the rule registry and a
//! per-rule state machine (pending, firing, cleared) with sustained-breach
//! windows and re-fire cooldowns. Firing alerts run the rule's actions
//! through an [`action::ActionRegistry`] and are published on the shared
//! [`hivemon_common::events::EventBus`].

pub mod action;
pub mod engine;
pub mod error;
pub mod rule;


pub use engine::{ActiveAlertState, AlertRuleEngine, EvaluationReport};
pub use rule::{AlertRule, CompareOp, RuleConfig};
