use hivemon_storage::error::StorageError;

/// Errors that can occur within the anomaly detection subsystem.
///
/// Detectors themselves never fail on insufficient data; they return no
/// anomalies. Errors come from invalid construction parameters or from the
/// store backing a detection run.
#[derive(Debug, thiserror::Error)]
pub enum AnomalyError {
    /// A detector was constructed with an out-of-range parameter.
    #[error("Anomaly: invalid parameter: {0}")]
    InvalidParameter(String),

    /// Reading the detection window from the store failed.
    #[error("Anomaly: {0}")]
    Storage(#[from] StorageError),
}

/// Convenience `Result` alias for anomaly operations.
pub type Result<T> = std::result::Result<T, AnomalyError>;
