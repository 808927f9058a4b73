use thiserror::Error;

/// Domain errors surfaced by feature derivation, training, and prediction.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed indicator or row values (non-numeric input, zero close price)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Fewer than the minimum historical rows, even after the mock-data fallback
    #[error("training data unavailable: {0}")]
    DataUnavailable(String),

    /// Fewer than the minimum aligned feature/label samples after truncation
    #[error("insufficient training samples: {0}")]
    InsufficientData(String),

    /// Inference attempted with no model in memory (defensive; the fallback
    /// model makes this unreachable in normal operation)
    #[error("model not loaded")]
    ModelNotLoaded,

    /// Model artifact read/write failure
    #[error("model persistence failed: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
