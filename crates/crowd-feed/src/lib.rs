//! View model reconciliation for the temple crowd monitor.
//!
//! Merges the bulk snapshot, per-temple history and live push updates into
//! a single view model owned by `Reconciler`.

pub mod error;
pub mod history;
pub mod parser;
pub mod reconciler;

pub use error::{FeedError, FeedResult};
pub use history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
pub use parser::{FeedEvent, MessageParser, ParseStats, UPDATE_EVENT};
pub use reconciler::{
    ApplyOutcome, EntityView, HistoryOutcome, HistoryRequest, MergePolicy, Reconciler,
    SnapshotSummary, ViewSnapshot,
};
