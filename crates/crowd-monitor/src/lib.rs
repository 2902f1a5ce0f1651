//! Headless temple crowd-level monitor.
//!
//! Wires the REST fetchers, the push channel session and the reconciler
//! into one event loop:
//! - Snapshot at startup, on every reconnect and optionally on a timer
//! - History for the selected temple on selection and on a timer
//! - Live `update_data` events from the push channel
//! - Selection commands from stdin

pub mod app;
pub mod command;
pub mod config;
pub mod error;

pub use app::{AppEvent, Application};
pub use command::Command;
pub use config::{AppConfig, WsConfig};
pub use error::{AppError, AppResult};
