//! Socket.IO push channel session for the crowd monitor.
//!
//! Provides the live update stream with:
//! - Explicit reconnect policy (exponential backoff, max attempts, jitter)
//! - Engine.IO heartbeat supervision (server ping, client pong)
//! - Stable session identity across transport reconnects
//! - Channel-based delivery of state transitions and inbound events

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;

pub use connection::{
    ConnectionSession, ConnectionState, ReconnectPolicy, SessionConfig, SessionEvent,
};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStats};
pub use message::{EnginePacket, OpenHandshake, SocketPacket};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
