//! Socket.IO v4 / Engine.IO v4 text packet codec.
//!
//! Engine.IO frames carry a one-character type prefix:
//! `0` open, `1` close, `2` ping, `3` pong, `4` message, `5` upgrade, `6` noop.
//! A `4` frame wraps a Socket.IO packet, itself prefixed with its type:
//! `0` connect, `1` disconnect, `2` event, `3` ack, `4` connect error.
//!
//! Examples:
//! - `0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}`
//! - `40` / `40{"sid":"def"}` (namespace connect request / ack)
//! - `42["update_data",{"temple":"TempleB","peopleCount":12,...}]`
//!
//! Only the default namespace is used; binary packets are not supported.

use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine.IO handshake sent by the server in the `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id for this transport connection.
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// How often the server pings (ms).
    pub ping_interval: u64,
    /// How long the server waits for a pong (ms).
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Socket.IO packet carried inside an Engine.IO `message` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect (request from client, ack from server).
    Connect(Option<Value>),
    /// Namespace disconnect.
    Disconnect,
    /// Named event with its first argument (`Null` when absent).
    Event {
        name: String,
        payload: Value,
        ack_id: Option<u64>,
    },
    /// Acknowledgement of a client-emitted event.
    Ack { ack_id: u64, args: Vec<Value> },
    /// Server refused the namespace connect.
    ConnectError(Value),
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode a text frame.
    pub fn decode(text: &str) -> WsResult<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| WsError::ParseError("empty frame".to_string()))?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_string())),
            '3' => Ok(Self::Pong(rest.to_string())),
            '4' => Ok(Self::Message(SocketPacket::decode(rest)?)),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(WsError::ParseError(format!(
                "unknown engine.io packet type {other:?}"
            ))),
        }
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> WsResult<String> {
        Ok(match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(packet) => format!("4{}", packet.encode()?),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        })
    }

    /// Client request to join the default namespace.
    pub fn connect_request() -> Self {
        Self::Message(SocketPacket::Connect(None))
    }

    /// Reply to a server ping, echoing its probe data.
    pub fn pong_for(ping_data: &str) -> Self {
        Self::Pong(ping_data.to_string())
    }
}

impl SocketPacket {
    /// Decode the Socket.IO part of a `4` frame.
    pub fn decode(text: &str) -> WsResult<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| WsError::ParseError("empty socket.io packet".to_string()))?;
        let mut rest = chars.as_str();

        // Namespace ("/admin,"); the default namespace is omitted on the wire.
        if rest.starts_with('/') {
            rest = match rest.find(',') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        }

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| WsError::ParseError(format!("invalid ack id: {e}")))?,
            )
        } else {
            None
        };
        let body = &rest[digits..];

        match kind {
            '0' => {
                let data = if body.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(body)?)
                };
                Ok(Self::Connect(data))
            }
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut args = match serde_json::from_str::<Value>(body)? {
                    Value::Array(args) => args.into_iter(),
                    _ => {
                        return Err(WsError::ParseError(
                            "event body is not an array".to_string(),
                        ))
                    }
                };
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(WsError::ParseError("event without name".to_string())),
                };
                Ok(Self::Event {
                    name,
                    payload: args.next().unwrap_or(Value::Null),
                    ack_id,
                })
            }
            '3' => {
                let ack_id = ack_id
                    .ok_or_else(|| WsError::ParseError("ack without id".to_string()))?;
                let args = match serde_json::from_str::<Value>(body)? {
                    Value::Array(args) => args,
                    other => vec![other],
                };
                Ok(Self::Ack { ack_id, args })
            }
            '4' => {
                let data = if body.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(body)?
                };
                Ok(Self::ConnectError(data))
            }
            other => Err(WsError::ParseError(format!(
                "unsupported socket.io packet type {other:?}"
            ))),
        }
    }

    /// Encode for the default namespace.
    pub fn encode(&self) -> WsResult<String> {
        Ok(match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(data)) => format!("0{}", serde_json::to_string(data)?),
            Self::Disconnect => "1".to_string(),
            Self::Event {
                name,
                payload,
                ack_id,
            } => {
                let args = if payload.is_null() {
                    Value::Array(vec![Value::String(name.clone())])
                } else {
                    Value::Array(vec![Value::String(name.clone()), payload.clone()])
                };
                let id = ack_id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{id}{}", serde_json::to_string(&args)?)
            }
            Self::Ack { ack_id, args } => format!("3{ack_id}{}", serde_json::to_string(args)?),
            Self::ConnectError(data) => format!("4{}", serde_json::to_string(data)?),
        })
    }
}
