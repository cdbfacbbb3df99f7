use hivemon_storage::error::StorageError;

/// Errors raised by the alert rule engine.
///
/// # Examples
///
/// ```rust
/// use hivemon_alert::error::AlertError;
///
/// let err = AlertError::UnsupportedOperator("~=".to_string());
/// assert!(err.to_string().contains("~="));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The rule is missing a required field or carries an invalid value.
    #[error("Alert: invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Alert: unsupported operator '{0}'")]
    UnsupportedOperator(String),

    /// Reading samples for evaluation failed. Rule state is left untouched.
    #[error("Alert: {0}")]
    Storage(#[from] StorageError),
}

impl AlertError {
    pub fn is_storage(&self) -> bool {
        matches!(self, AlertError::Storage(_))
    }
}

/// Convenience `Result` alias for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
