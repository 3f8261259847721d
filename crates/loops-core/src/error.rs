use thiserror::Error;

/// Errors raised while converting records to and from their stored form.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid {kind} record: {message}")]
    InvalidRecord { kind: String, message: String },
}

impl CoreError {
    /// Create a new InvalidRecord error
    pub fn invalid_record(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
