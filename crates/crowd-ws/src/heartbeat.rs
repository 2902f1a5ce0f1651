//! Heartbeat supervision for the push channel.
//!
//! Engine.IO v4 heartbeats are server-driven: the server sends a ping every
//! `pingInterval` and the client answers with a pong. The client considers
//! the transport dead when nothing at all has arrived for
//! `pingInterval + pingTimeout`.

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Heartbeat monitor for one transport connection.
pub struct HeartbeatMonitor {
    /// Server ping interval (ms).
    ping_interval_ms: RwLock<u64>,
    /// Grace period after a missed ping (ms).
    ping_timeout_ms: RwLock<u64>,
    /// Last frame received (any frame).
    last_message: RwLock<Instant>,
    /// Last server ping received.
    last_ping: RwLock<Option<Instant>>,
    /// Pings answered on this connection.
    pings_answered: RwLock<u64>,
}

impl HeartbeatMonitor {
    /// Create a monitor with fallback timings used until the handshake arrives.
    pub fn new(ping_interval_ms: u64, ping_timeout_ms: u64) -> Self {
        Self {
            ping_interval_ms: RwLock::new(ping_interval_ms),
            ping_timeout_ms: RwLock::new(ping_timeout_ms),
            last_message: RwLock::new(Instant::now()),
            last_ping: RwLock::new(None),
            pings_answered: RwLock::new(0),
        }
    }

    /// Adopt the timings announced in the server handshake.
    pub fn configure(&self, ping_interval_ms: u64, ping_timeout_ms: u64) {
        *self.ping_interval_ms.write() = ping_interval_ms;
        *self.ping_timeout_ms.write() = ping_timeout_ms;
        debug!(ping_interval_ms, ping_timeout_ms, "Heartbeat configured");
    }

    /// Reset state (called on every new transport connection).
    pub fn reset(&self) {
        *self.last_message.write() = Instant::now();
        *self.last_ping.write() = None;
        *self.pings_answered.write() = 0;
    }

    /// Record that any frame was received.
    pub fn record_message(&self) {
        *self.last_message.write() = Instant::now();
    }

    /// Record that a server ping was answered.
    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Instant::now());
        *self.pings_answered.write() += 1;
    }

    /// Maximum silence tolerated before the transport is declared dead.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(*self.ping_interval_ms.read() + *self.ping_timeout_ms.read())
    }

    pub fn time_since_last_message(&self) -> Duration {
        self.last_message.read().elapsed()
    }

    /// Check if the server has gone silent for too long.
    pub fn is_timed_out(&self) -> bool {
        self.time_since_last_message() > self.deadline()
    }

    /// Wait for the next heartbeat check.
    pub async fn wait_for_check(&self) {
        let period = (*self.ping_timeout_ms.read() / 2).max(100);
        tokio::time::sleep(Duration::from_millis(period)).await;
    }

    /// Get heartbeat statistics.
    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            time_since_last_message_ms: self.time_since_last_message().as_millis() as u64,
            time_since_last_ping_ms: self
                .last_ping
                .read()
                .map(|t| t.elapsed().as_millis() as u64),
            pings_answered: *self.pings_answered.read(),
            deadline_ms: self.deadline().as_millis() as u64,
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub time_since_last_message_ms: u64,
    pub time_since_last_ping_ms: Option<u64>,
    pub pings_answered: u64,
    pub deadline_ms: u64,
}
