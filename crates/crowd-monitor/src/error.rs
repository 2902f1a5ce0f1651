//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid command: {0}")]
    Command(String),

    #[error("Core error: {0}")]
    Core(#[from] crowd_core::CoreError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] crowd_ws::WsError),

    #[error("Feed error: {0}")]
    Feed(#[from] crowd_feed::FeedError),

    #[error("Registry error: {0}")]
    Registry(#[from] crowd_registry::RegistryError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crowd_telemetry::TelemetryError),
}

pub type AppResult<T> = Result<T, AppError>;
