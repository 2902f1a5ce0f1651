//! Push channel session.
//!
//! Owns one Socket.IO connection at a time, reports state transitions and
//! forwards inbound events. Reconnection follows an explicit
//! `ReconnectPolicy`; the session id stays the same across reconnects while
//! each transport connection gets its own Engine.IO sid.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::message::{EnginePacket, SocketPacket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Engine.IO path and query appended to a bare endpoint.
const SOCKET_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum consecutive failed attempts (0 = infinite).
    #[serde(default)]
    pub max_attempts: u32,
    /// Base delay for exponential backoff (ms).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum backoff delay before jitter (ms).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of random jitter added to each delay (ms, 0 = none).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_jitter_ms() -> u64 {
    500
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay without jitter: `base * 2^(attempt-1)`, capped.
    ///
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Backoff delay with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand_jitter() % self.jitter_ms
        };
        self.backoff_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Whether the given number of consecutive failures exhausts the policy.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Push endpoint (`ws://host:port` or a full `/socket.io/` URL).
    pub url: String,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Time allowed for the open packet and namespace ack (ms).
    pub handshake_timeout_ms: u64,
    /// Ping interval assumed until the server handshake arrives (ms).
    pub ping_interval_ms: u64,
    /// Ping timeout assumed until the server handshake arrives (ms).
    pub ping_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: ReconnectPolicy::default(),
            handshake_timeout_ms: 10000,
            ping_interval_ms: 25000,
            ping_timeout_ms: 20000,
        }
    }
}

impl SessionConfig {
    /// WebSocket URL including the Engine.IO path.
    pub fn endpoint_url(&self) -> String {
        if self.url.contains("/socket.io/") {
            self.url.clone()
        } else {
            format!("{}{}", self.url.trim_end_matches('/'), SOCKET_IO_PATH)
        }
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Event delivered to the session owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged(ConnectionState),
    /// Inbound Socket.IO event, forwarded verbatim.
    Event {
        name: String,
        payload: serde_json::Value,
    },
}

/// Push channel session.
pub struct ConnectionSession {
    config: SessionConfig,
    /// Stable across reconnects.
    session_id: Uuid,
    state: RwLock<ConnectionState>,
    /// Engine.IO sid of the current transport connection.
    transport_sid: RwLock<Option<String>>,
    heartbeat: HeartbeatMonitor,
    event_tx: mpsc::Sender<SessionEvent>,
    /// Consecutive failed attempts since the last successful connect.
    reconnect_count: RwLock<u32>,
    /// Successful connects over the session lifetime.
    connect_count: RwLock<u64>,
    /// Cancellation token for teardown.
    shutdown_token: CancellationToken,
}

impl ConnectionSession {
    /// Create a new session. The session starts in `Connecting`; call
    /// `run()` to drive it.
    pub fn new(config: SessionConfig, event_tx: mpsc::Sender<SessionEvent>) -> Self {
        let heartbeat = HeartbeatMonitor::new(config.ping_interval_ms, config.ping_timeout_ms);
        Self {
            config,
            session_id: Uuid::new_v4(),
            state: RwLock::new(ConnectionState::Connecting),
            transport_sid: RwLock::new(None),
            heartbeat,
            event_tx,
            reconnect_count: RwLock::new(0),
            connect_count: RwLock::new(0),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Engine.IO sid of the live transport, if any.
    pub fn transport_sid(&self) -> Option<String> {
        self.transport_sid.read().clone()
    }

    /// Get current session state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_count(&self) -> u32 {
        *self.reconnect_count.read()
    }

    pub fn connect_count(&self) -> u64 {
        *self.connect_count.read()
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Tear the session down.
    ///
    /// Cancels the shutdown token; the message loop closes the transport and
    /// the reconnect loop exits without waiting out its backoff.
    pub fn shutdown(&self) {
        info!(session_id = %self.session_id, "Session shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and keep the session alive until shutdown or until the
    /// reconnect policy is exhausted.
    pub async fn run(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                self.transition(ConnectionState::Disconnected).await;
                return Ok(());
            }

            self.transition(ConnectionState::Connecting).await;

            let mut established = false;
            match self.try_connect(&mut established).await {
                Ok(()) => info!("Push connection closed"),
                Err(e) => warn!(error = %e, "Push connection error"),
            }
            *self.transport_sid.write() = None;
            self.transition(ConnectionState::Disconnected).await;

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                return Ok(());
            }

            if established {
                attempt = 0;
            }
            attempt += 1;
            *self.reconnect_count.write() = attempt;

            if self.config.reconnect.is_exhausted(attempt) {
                error!(attempt, "Max reconnection attempts reached");
                return Err(WsError::ReconnectExhausted(attempt));
            }

            let delay = self.config.reconnect.delay_for(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    return Ok(());
                }
            }
        }
    }

    async fn transition(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev == next {
            return;
        }
        info!(
            session_id = %self.session_id,
            from = %prev,
            to = %next,
            "Session state changed"
        );
        self.emit(SessionEvent::StateChanged(next)).await;
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Session event receiver dropped");
        }
    }

    async fn try_connect(&self, established: &mut bool) -> WsResult<()> {
        let url = self.config.endpoint_url();
        info!(url = %url, session_id = %self.session_id, "Connecting to push channel");

        let connect = connect_async_tls_with_config(url.as_str(), None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result?,
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        self.heartbeat.reset();

        let handshake_timeout = Duration::from_millis(self.config.handshake_timeout_ms);
        tokio::select! {
            result = tokio::time::timeout(handshake_timeout, self.handshake(&mut write, &mut read)) => {
                result.map_err(|_| {
                    WsError::HandshakeFailed("timed out waiting for handshake".to_string())
                })??;
            }
            () = self.shutdown_token.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }

        *established = true;
        *self.reconnect_count.write() = 0;
        *self.connect_count.write() += 1;
        self.transition(ConnectionState::Connected).await;

        self.message_loop(&mut write, &mut read).await
    }

    /// Wait for the Engine.IO open packet, join the default namespace and
    /// wait for the namespace ack.
    async fn handshake(&self, write: &mut WsSink, read: &mut WsSource) -> WsResult<()> {
        let mut opened = false;

        loop {
            let text = match read.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = close_details(frame, "Closed during handshake");
                    return Err(WsError::ConnectionClosed { code, reason });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(WsError::HandshakeFailed(
                        "stream ended during handshake".to_string(),
                    ))
                }
            };

            self.heartbeat.record_message();

            match EnginePacket::decode(&text)? {
                EnginePacket::Open(handshake) => {
                    debug!(sid = %handshake.sid, "Engine.IO open received");
                    self.heartbeat
                        .configure(handshake.ping_interval, handshake.ping_timeout);
                    *self.transport_sid.write() = Some(handshake.sid);
                    opened = true;
                    let connect = EnginePacket::connect_request().encode()?;
                    write.send(Message::Text(connect)).await?;
                }
                EnginePacket::Ping(data) => {
                    let pong = EnginePacket::pong_for(&data).encode()?;
                    write.send(Message::Text(pong)).await?;
                    self.heartbeat.record_ping();
                }
                EnginePacket::Message(SocketPacket::Connect(_)) if opened => {
                    info!(
                        sid = ?self.transport_sid(),
                        session_id = %self.session_id,
                        "Push channel connected"
                    );
                    return Ok(());
                }
                EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                    return Err(WsError::ConnectRejected(data.to_string()));
                }
                EnginePacket::Close => {
                    return Err(WsError::ConnectionClosed {
                        code: 1000,
                        reason: "engine.io close during handshake".to_string(),
                    });
                }
                other => {
                    debug!(packet = ?other, "Ignoring packet during handshake");
                }
            }
        }
    }

    async fn message_loop(&self, write: &mut WsSink, read: &mut WsSource) -> WsResult<()> {
        loop {
            tokio::select! {
                // Teardown takes priority over everything else.
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(write, &text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = close_details(frame, "Normal close");
                            warn!(code, %reason, "Push channel closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Push channel read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("Push channel stream ended");
                            return Ok(());
                        }
                        Some(Ok(_)) => {
                            self.heartbeat.record_message();
                        }
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        error!(
                            silent_ms = self.heartbeat.time_since_last_message().as_millis() as u64,
                            "Heartbeat timeout"
                        );
                        return Err(WsError::HeartbeatTimeout);
                    }
                }
            }
        }
    }

    async fn handle_text_message(&self, write: &mut WsSink, text: &str) -> WsResult<()> {
        self.heartbeat.record_message();

        let packet = match EnginePacket::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, frame = %text, "Dropping undecodable frame");
                return Ok(());
            }
        };

        match packet {
            EnginePacket::Ping(data) => {
                let pong = EnginePacket::pong_for(&data).encode()?;
                write.send(Message::Text(pong)).await?;
                self.heartbeat.record_ping();
                debug!("Answered server ping");
            }
            EnginePacket::Message(SocketPacket::Event { name, payload, .. }) => {
                debug!(event = %name, "Inbound event");
                self.emit(SessionEvent::Event { name, payload }).await;
            }
            EnginePacket::Message(SocketPacket::Disconnect) => {
                return Err(WsError::ConnectionClosed {
                    code: 1000,
                    reason: "server disconnected namespace".to_string(),
                });
            }
            EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                return Err(WsError::ConnectRejected(data.to_string()));
            }
            EnginePacket::Close => {
                return Err(WsError::ConnectionClosed {
                    code: 1000,
                    reason: "engine.io close".to_string(),
                });
            }
            other => {
                debug!(packet = ?other, "Ignoring packet");
            }
        }

        Ok(())
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

fn close_details(
    frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame<'_>>,
    fallback: &str,
) -> (u16, String) {
    frame
        .map(|f| (f.code.into(), f.reason.to_string()))
        .unwrap_or((1000, fallback.to_string()))
}

/// Generate random jitter from the clock's sub-second nanos.
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}
