//! Core domain types for the temple crowd monitor.
//!
//! This crate provides the types shared by every other crate:
//! - `EntityKey`: Case-sensitive identifier of a monitored temple
//! - `Reading`: Latest occupancy observation for one temple
//! - `CrowdLevel`: Categorical occupancy classification
//! - `ReadingPayload`: Wire shape used by the REST API and the push channel

pub mod error;
pub mod types;

pub use error::{CoreError, Result};
pub use types::{
    ConnectivityState, CrowdLevel, EntityKey, Reading, ReadingPayload, LAST_UPDATED_FORMAT,
    LOADING_PLACEHOLDER,
};
