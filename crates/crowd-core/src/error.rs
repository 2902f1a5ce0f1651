//! Error types for crowd-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid entity key: {0:?}")]
    InvalidEntityKey(String),

    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
