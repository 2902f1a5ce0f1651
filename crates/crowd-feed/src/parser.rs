//! Push event parsing.
//!
//! Turns `SessionEvent`s from the push channel into feed events for the
//! reconciler. Only `update_data` carries readings; other event names are
//! ignored.

use crate::error::{FeedError, FeedResult};
use crowd_core::{ConnectivityState, Reading, ReadingPayload};
use crowd_ws::{ConnectionState, SessionEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Socket.IO event name carrying one reading.
pub const UPDATE_EVENT: &str = "update_data";

/// Parser counters.
#[derive(Debug, Default)]
pub struct ParseStats {
    pub parsed_count: AtomicU64,
    pub rejected_count: AtomicU64,
    pub ignored_count: AtomicU64,
}

impl ParseStats {
    pub fn parsed(&self) -> u64 {
        self.parsed_count.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored_count.load(Ordering::Relaxed)
    }
}

/// Event for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Reading(Reading),
    Connectivity(ConnectivityState),
}

/// Push event parser.
#[derive(Debug, Default)]
pub struct MessageParser {
    stats: ParseStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Parse one session event.
    ///
    /// `Connecting` produces nothing: the indicator only distinguishes
    /// connected from not connected.
    pub fn parse_session_event(&self, event: &SessionEvent) -> FeedResult<Option<FeedEvent>> {
        match event {
            SessionEvent::StateChanged(ConnectionState::Connected) => {
                Ok(Some(FeedEvent::Connectivity(ConnectivityState::Connected)))
            }
            SessionEvent::StateChanged(ConnectionState::Disconnected) => {
                Ok(Some(FeedEvent::Connectivity(ConnectivityState::Disconnected)))
            }
            SessionEvent::StateChanged(ConnectionState::Connecting) => Ok(None),
            SessionEvent::Event { name, payload } => Ok(self
                .parse_event(name, payload)?
                .map(FeedEvent::Reading)),
        }
    }

    /// Parse a named push event.
    pub fn parse_event(&self, name: &str, payload: &serde_json::Value) -> FeedResult<Option<Reading>> {
        if name != UPDATE_EVENT {
            self.stats.ignored_count.fetch_add(1, Ordering::Relaxed);
            debug!(event = %name, "Ignoring push event");
            return Ok(None);
        }

        match ReadingPayload::from_value(payload.clone()) {
            Ok(payload) => {
                self.stats.parsed_count.fetch_add(1, Ordering::Relaxed);
                Ok(Some(payload.into_reading()))
            }
            Err(e) => {
                self.stats.rejected_count.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Malformed update payload");
                Err(FeedError::ParseError(format!("Invalid {UPDATE_EVENT} payload: {e}")))
            }
        }
    }
}
