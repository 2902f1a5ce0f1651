//! Fetcher contracts used by the application event loop.
//!
//! The reconciliation engine never performs I/O itself; the application
//! drives these fetchers and feeds their results back into the engine.

use crate::error::RegistryResult;
use crowd_core::{EntityKey, Reading};
use std::future::Future;

/// One-shot retrieval of current readings.
pub trait SnapshotFetcher: Send + Sync + 'static {
    /// Current reading of every temple the backend knows.
    fn fetch_all(&self) -> impl Future<Output = RegistryResult<Vec<Reading>>> + Send;

    /// Current reading of one temple.
    fn fetch_entity(&self, entity: &EntityKey) -> impl Future<Output = RegistryResult<Reading>> + Send;
}

/// One-shot retrieval of the most recent readings of one temple, newest-first.
pub trait HistoryFetcher: Send + Sync + 'static {
    fn fetch_history(
        &self,
        entity: &EntityKey,
        limit: usize,
    ) -> impl Future<Output = RegistryResult<Vec<Reading>>> + Send;
}
