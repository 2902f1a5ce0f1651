//! Mock Socket.IO server for integration tests.
//!
//! Speaks just enough Engine.IO v4 / Socket.IO v4 to drive a client:
//! - Sends the `open` packet on accept
//! - Acknowledges the `40` namespace connect (or rejects it with `44`)
//! - Broadcasts frames to every live connection
//! - Drops every live connection on request
//! - Records received text frames

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerCommand {
    Frame(String),
    DropAll,
}

#[derive(Clone)]
struct Shared {
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    reject_connect: Arc<AtomicBool>,
    ping_interval_ms: u64,
    ping_timeout_ms: u64,
}

/// A mock Socket.IO server for testing.
pub struct MockSocketIoServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    command_tx: broadcast::Sender<ServerCommand>,
    shared: Shared,
}

impl MockSocketIoServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        Self::start_with_heartbeat(25000, 20000).await
    }

    /// Start a server that announces the given heartbeat timings.
    pub async fn start_with_heartbeat(ping_interval_ms: u64, ping_timeout_ms: u64) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (command_tx, _) = broadcast::channel::<ServerCommand>(64);

        let shared = Shared {
            messages: Arc::new(Mutex::new(VecDeque::new())),
            connections: Arc::new(Mutex::new(0)),
            reject_connect: Arc::new(AtomicBool::new(false)),
            ping_interval_ms,
            ping_timeout_ms,
        };

        let accept_shared = shared.clone();
        let accept_commands = command_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let commands = accept_commands.subscribe();
                        tokio::spawn(handle_connection(stream, accept_shared.clone(), commands));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            command_tx,
            shared,
        }
    }

    /// Base URL of the server (the client appends the Engine.IO path).
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of WebSocket connections accepted.
    pub async fn connection_count(&self) -> u32 {
        *self.shared.connections.lock().await
    }

    /// All text frames received from clients.
    pub async fn received_messages(&self) -> Vec<String> {
        self.shared.messages.lock().await.iter().cloned().collect()
    }

    /// Answer namespace connects with `44` instead of `40`.
    pub fn reject_connects(&self, reject: bool) {
        self.shared.reject_connect.store(reject, Ordering::SeqCst);
    }

    /// Send a raw text frame to every live connection.
    pub fn send_frame(&self, frame: impl Into<String>) {
        let _ = self.command_tx.send(ServerCommand::Frame(frame.into()));
    }

    /// Emit a Socket.IO event to every live connection.
    pub fn emit(&self, event: &str, payload: Value) {
        self.send_frame(format!("42{}", json!([event, payload])));
    }

    /// Emit an `update_data` event.
    pub fn emit_update(&self, temple: &str, people_count: u32) {
        let level = match people_count {
            0..=20 => "Low",
            21..=40 => "Medium",
            _ => "High",
        };
        self.emit(
            "update_data",
            json!({
                "temple": temple,
                "peopleCount": people_count,
                "lastUpdated": "2024-03-01 10:00:00",
                "nextHour": "Low",
                "crowdLevel": level
            }),
        );
    }

    /// Close every live connection.
    pub fn drop_connections(&self) {
        let _ = self.command_tx.send(ServerCommand::DropAll);
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        self.drop_connections();
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    shared: Shared,
    mut commands: broadcast::Receiver<ServerCommand>,
) {
    let conn_id = {
        let mut count = shared.connections.lock().await;
        *count += 1;
        *count
    };

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    let open = json!({
        "sid": format!("mock-sid-{conn_id}"),
        "upgrades": [],
        "pingInterval": shared.ping_interval_ms,
        "pingTimeout": shared.ping_timeout_ms,
        "maxPayload": 1000000
    });
    if write
        .send(Message::Text(format!("0{open}")))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        shared.messages.lock().await.push_back(text.clone());

                        if text == "40" {
                            let reply = if shared.reject_connect.load(Ordering::SeqCst) {
                                r#"44{"message":"Not authorized"}"#.to_string()
                            } else {
                                format!(r#"40{{"sid":"mock-socket-{conn_id}"}}"#)
                            };
                            let _ = write.send(Message::Text(reply)).await;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            command = commands.recv() => {
                match command {
                    Ok(ServerCommand::Frame(frame)) => {
                        if write.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServerCommand::DropAll) | Err(_) => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockSocketIoServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
