//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}

pub type FeedResult<T> = Result<T, FeedError>;
