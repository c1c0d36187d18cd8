//! Wire types for the duet signaling relay
//!
//! Clients talk to the relay over a WebSocket using JSON text frames tagged
//! by `"type"`. Requests flow client → server, events flow server → client.
//!
//! ## Requests
//!
//! - `{"type":"join-room","room":"a1b2c3"}`
//! - `{"type":"leave-room"}`
//! - `{"type":"signal","to":"<uuid>","data":{...}}`
//! - `{"type":"keep-alive"}`
//!
//! ## Events
//!
//! - `{"type":"joined","you":"<uuid>","others":["<uuid>"]}`
//! - `{"type":"peer-joined","id":"<uuid>"}`
//! - `{"type":"peer-left","id":"<uuid>"}`
//! - `{"type":"signal","from":"<uuid>","data":{...}}`
//! - `{"type":"error-message","message":"Room full"}`
//!
//! The `data` of a signal is opaque: it is carried as raw JSON and handed to
//! the addressee untouched.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The format for a peer signature given by the signaling server
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Fresh random identity for a newly accepted connection
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for PeerId {
    fn from(id: Uuid) -> Self {
        PeerId(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(PeerId)
    }
}

/// Short, human-transcribable room identifier
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(pub String);

impl RoomCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for RoomCode {
    fn from(code: &str) -> Self {
        RoomCode(code.to_string())
    }
}

impl From<String> for RoomCode {
    fn from(code: String) -> Self {
        RoomCode(code)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requests go from peer to signaling server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerRequest {
    /// Ask to be admitted to a room
    JoinRoom {
        #[serde(default)]
        room: RoomCode,
    },
    /// Leave the current room, if any
    LeaveRoom,
    /// Relay an opaque negotiation payload to another connection
    Signal {
        to: PeerId,
        #[serde(default)]
        data: serde_json::Value,
    },
    KeepAlive,
}

/// Events go from signaling server to peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerEvent {
    /// Admission succeeded; `others` lists the peers already present
    Joined { you: PeerId, others: Vec<PeerId> },
    PeerJoined { id: PeerId },
    PeerLeft { id: PeerId },
    /// Payload relayed verbatim from `from`
    Signal {
        from: PeerId,
        data: serde_json::Value,
    },
    ErrorMessage { message: String },
}

impl PeerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        PeerEvent::ErrorMessage {
            message: message.into(),
        }
    }
}

impl FromStr for PeerRequest {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for PeerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for PeerEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
