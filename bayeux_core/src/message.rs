//! The Bayeux wire envelope and its response accessors.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel for the protocol handshake.
pub const HANDSHAKE_CHANNEL: &str = "/meta/handshake";
/// Channel for connect (poll) requests.
pub const CONNECT_CHANNEL: &str = "/meta/connect";
/// Channel for subscribe requests.
pub const SUBSCRIBE_CHANNEL: &str = "/meta/subscribe";
/// Channel for unsubscribe requests.
pub const UNSUBSCRIBE_CHANNEL: &str = "/meta/unsubscribe";

/// The protocol version sent during handshake.
pub const BAYEUX_VERSION: &str = "1.0";

const META_PREFIX: &str = "/meta/";

/// The connection types a [`Transport`](crate::transport::Transport) can
/// carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// HTTP long-polling; every Bayeux server must support it.
    #[serde(rename = "long-polling")]
    LongPolling,

    /// A long-lived bidirectional WebSocket.
    #[serde(rename = "websocket")]
    Websocket,
}

impl ConnectionType {
    /// The wire name of this connection type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionType::LongPolling => "long-polling",
            ConnectionType::Websocket => "websocket",
        }
    }

    /// Parse a wire name, ignoring connection types this client does not
    /// implement (e.g. `callback-polling`).
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "long-polling" => Some(ConnectionType::LongPolling),
            "websocket" => Some(ConnectionType::Websocket),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server reconnection hint carried on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// Reconnect with a connect request.
    Retry,
    /// Re-handshake before connecting again.
    Handshake,
    /// Terminal: no further connect attempts are permitted.
    None,
}

/// Server advice: how and when to reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,

    /// Milliseconds to wait before the advised action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// A single Bayeux frame.
///
/// Outbound envelopes serialize with empty fields elided; inbound frames may
/// populate any subset. The same type serves requests, responses, and
/// server-pushed messages, so the response accessors ([`is_successful`],
/// [`advice`], …) are available on every frame.
///
/// [`is_successful`]: Message::is_successful
/// [`advice`]: Message::advice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel: String,

    #[serde(rename = "clientId", skip_serializing_if = "String::is_empty")]
    pub client_id: String,

    /// Per-client message id, a strictly increasing decimal string.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Handshake only.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Handshake only. Kept as raw wire names because servers advertise
    /// connection types this client does not implement.
    #[serde(
        rename = "supportedConnectionTypes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub supported_connection_types: Vec<String>,

    /// Connect only.
    #[serde(rename = "connectionType", skip_serializing_if = "String::is_empty")]
    pub connection_type: String,

    /// Subscribe/unsubscribe only.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subscription: String,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,

    /// Extension scratch space, e.g. the auth token.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub ext: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
}

impl Message {
    /// A fresh envelope on `channel`, stamped with the current client id.
    #[must_use]
    pub fn new(client_id: &str, channel: &str) -> Self {
        Message {
            channel: channel.to_owned(),
            client_id: client_id.to_owned(),
            ..Message::default()
        }
    }

    /// Whether the server marked this response successful.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// Whether this frame carries a non-empty `error`.
    #[must_use]
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Whether this frame is on a `/meta/*` channel.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.channel.starts_with(META_PREFIX)
    }

    /// The `data.type` content type, if any.
    #[must_use]
    pub fn data_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    /// The advice on this frame, defaulting to "no advice".
    #[must_use]
    pub fn advice(&self) -> Advice {
        self.advice.unwrap_or_default()
    }

    /// Whether the handshake response advertises `connection_type`.
    #[must_use]
    pub fn supports(&self, connection_type: ConnectionType) -> bool {
        self.supported_connection_types
            .iter()
            .any(|name| name == connection_type.as_str())
    }
}
