use anyhow::Result;
use hivemon_common::types::{format_labels, Action, AlertEvent, Severity};
use std::collections::HashMap;

/// Executes one kind of rule action (e.g. `log`, `webhook`) for a firing alert.
///
/// Delivery transports live outside this crate; they plug in by registering
/// a handler for their action type in an [`ActionRegistry`].
pub trait ActionHandler: Send + Sync {
    /// The `type` tag of the actions this handler executes.
    fn action_type(&self) -> &str;

    /// Runs `action` for `alert`. `action.config` is handler-specific.
    fn execute(&self, action: &Action, alert: &AlertEvent) -> Result<()>;
}

/// Writes the alert to the tracing log at a level matching its severity.
///
/// An optional `prefix` string in the action config is prepended to the
/// message.
pub struct LogAction;

impl ActionHandler for LogAction {
    fn action_type(&self) -> &str {
        "log"
    }

    fn execute(&self, action: &Action, alert: &AlertEvent) -> Result<()> {
        let prefix = action
            .config
            .get("prefix")
            .and_then(|v| v.as_str())
            .unwrap_or("ALERT");
        let labels = format_labels(&alert.labels);
        match alert.severity {
            Severity::Info => tracing::info!(
                rule_id = %alert.rule_id,
                metric = %alert.metric,
                value = alert.value,
                labels = %labels,
                "{prefix}: {}",
                alert.message
            ),
            Severity::Warning => tracing::warn!(
                rule_id = %alert.rule_id,
                metric = %alert.metric,
                value = alert.value,
                labels = %labels,
                "{prefix}: {}",
                alert.message
            ),
            Severity::Critical => tracing::error!(
                rule_id = %alert.rule_id,
                metric = %alert.metric,
                value = alert.value,
                labels = %labels,
                "{prefix}: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Registry of [`ActionHandler`]s keyed by action type.
///
/// # Examples
///
/// ```
/// use hivemon_alert::action::ActionRegistry;
///
/// let registry = ActionRegistry::default();
/// assert!(registry.has_handler("log"));
/// assert!(!registry.has_handler("webhook"));
/// ```
pub struct ActionRegistry {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry with no handlers, not even `log`.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler`, replacing any handler of the same type.
    pub fn register(&mut self, handler: Box<dyn ActionHandler>) {
        let action_type = handler.action_type().to_string();
        self.handlers.insert(action_type, handler);
    }

    pub fn has_handler(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Runs `action` through its handler. An action whose type has no
    /// registered handler is an error.
    pub fn dispatch(&self, action: &Action, alert: &AlertEvent) -> Result<()> {
        let handler = self
            .handlers
            .get(&action.action_type)
            .ok_or_else(|| anyhow::anyhow!("No handler for action type: {}", action.action_type))?;
        handler.execute(action, alert)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(LogAction));
        registry
    }
}
