use tablescan_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Table store error: {0}")]
    Store(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Malformed scan step: {0}")]
    MalformedStep(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unexpected store response: {0}")]
    UnexpectedResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl ScanError {
    /// Transient failures worth redelivering the message for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Store(_) | ScanError::Queue(_))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
