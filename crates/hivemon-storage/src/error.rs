/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use hivemon_storage::error::StorageError;
///
/// let err = StorageError::Unavailable("data dir is read-only".to_string());
/// assert!(err.is_unavailable());
/// assert!(err.to_string().contains("unavailable"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend cannot be reached or opened. Callers retry on the next tick.
    #[error("Storage: backend unavailable: {0}")]
    Unavailable(String),

    /// A sample carried a NaN or infinite value.
    #[error("Storage: invalid value {value} for metric '{metric}'")]
    InvalidValue { metric: String, value: f64 },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Label serialization or deserialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Returns true for failures of the backend itself, as opposed to bad input.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::Sqlite(_) | StorageError::Io(_)
        )
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
