//! Temple registry and REST fetchers for the crowd monitor.
//!
//! The registry fixes the universe of valid temple keys for a session.
//! The fetchers retrieve the bulk snapshot and per-temple history from the
//! backend REST API and convert failures into `RegistryError` at the
//! boundary, so the reconciliation engine only ever sees readings.

pub mod client;
pub mod error;
pub mod fetcher;
pub mod registry;

pub use client::{ApiClient, ApiEnvelope};
pub use error::{RegistryError, RegistryResult};
pub use fetcher::{HistoryFetcher, SnapshotFetcher};
pub use registry::{EntityDefinition, EntityMetadata, EntityRegistry};
