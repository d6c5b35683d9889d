use thiserror::Error;

use crate::model::MessageId;

pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Debug, Error)]
pub enum QaError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("unknown question id {0}")]
    UnknownQuestion(MessageId),

    #[error("corrupt record log: {0}")]
    Corrupt(String),

    #[error("poisoned lock")]
    Poisoned,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
