//! Wire protocol types.
//!
//! One JSON object per WebSocket text frame:
//!
//! ```json
//! { "from": "...", "to": "...", "type": "...", "data": ..., "msgType": "send" }
//! ```
//!
//! The relay interprets only the reserved `type` values (`joinRoom`, `pong`
//! inbound; `connectSuccess`, `occupantsChanged`, `ping` outbound). Every
//! other `type` is opaque application data routed per `msgType`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Client control message: join a named room.
pub const TYPE_JOIN_ROOM: &str = "joinRoom";
/// Client control message: heartbeat reply.
pub const TYPE_PONG: &str = "pong";
/// Server control message: heartbeat probe.
pub const TYPE_PING: &str = "ping";
/// Server control message: join acknowledgement carrying the join timestamp.
pub const TYPE_CONNECT_SUCCESS: &str = "connectSuccess";
/// Server control message: refreshed room membership.
pub const TYPE_OCCUPANTS_CHANGED: &str = "occupantsChanged";

/// `from` identity on server-originated envelopes.
pub const SERVER_IDENTITY: &str = "server";

/// Frame-level errors. A malformed frame is dropped; it never tears down
/// the connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Routing mode carried in the `msgType` field.
///
/// Inbound frames may carry arbitrary strings here (the reference client
/// stamps its join frame with `joinedRoom`), so anything other than `send`
/// or `broadcast` deserializes as [`RoutingMode::Other`]. Such envelopes
/// are only dispatched through the reserved `type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Unicast to the identity named in `to`.
    Send,
    /// Fan out to the sender's room, excluding one identity.
    Broadcast,
    #[default]
    #[serde(other)]
    Other,
}

/// A single wire frame, and the router's working data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender identity.
    #[serde(default)]
    pub from: String,
    /// Target identity (unicast) or excluded identity (broadcast).
    #[serde(default)]
    pub to: Option<String>,
    /// Message name; opaque unless reserved.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
    /// Routing mode.
    #[serde(rename = "msgType", default)]
    pub msg_type: RoutingMode,
}

impl Envelope {
    /// Parse one inbound frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap()
    }

    /// Join acknowledgement for the joining session; `data` is the join
    /// timestamp in epoch milliseconds.
    pub fn connect_success(to: &str, joined_at: i64) -> Self {
        Self {
            from: SERVER_IDENTITY.to_string(),
            to: Some(to.to_string()),
            kind: TYPE_CONNECT_SUCCESS.to_string(),
            data: json!(joined_at),
            msg_type: RoutingMode::Send,
        }
    }

    /// Membership refresh carrying the full occupant map of a room.
    pub fn occupants_changed(occupants: &HashMap<String, i64>) -> Self {
        Self {
            from: SERVER_IDENTITY.to_string(),
            to: None,
            kind: TYPE_OCCUPANTS_CHANGED.to_string(),
            data: json!({ "occupants": occupants }),
            msg_type: RoutingMode::Broadcast,
        }
    }

    /// Heartbeat probe addressed to one session.
    pub fn ping(to: &str) -> Self {
        Self {
            from: SERVER_IDENTITY.to_string(),
            to: Some(to.to_string()),
            kind: TYPE_PING.to_string(),
            data: Value::Null,
            msg_type: RoutingMode::Send,
        }
    }
}

/// Payload of a `joinRoom` envelope. `client_id` becomes the session's
/// identity from this point forward.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoinRoomData {
    pub room: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
}
