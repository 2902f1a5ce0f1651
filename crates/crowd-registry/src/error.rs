//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Registry must contain at least one entity")]
    EmptyRegistry,

    #[error("Duplicate entity key: {0}")]
    DuplicateEntity(String),

    #[error("Invalid entity: {0}")]
    InvalidEntity(#[from] crowd_core::CoreError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("API reported failure: {0}")]
    ApiFailure(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
