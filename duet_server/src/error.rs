//! Error types for the signaling relay

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures of the room registry's atomic operations
///
/// The `Display` text of the join-time variants is what the requesting
/// connection sees in its `error-message` event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live room has this code
    #[error("Room not found")]
    RoomNotFound,

    /// The room already holds two members
    #[error("Room full")]
    RoomFull,

    /// The connection is already a member of a room
    #[error("Already in room")]
    AlreadyInRoom,

    /// Every generated code collided with a live room
    #[error("Could not allocate a unique room code")]
    DuplicateCode,

    /// The OS random source failed
    #[error("Random source failure: {0}")]
    Random(String),
}

/// Errors that can occur while serving signaling traffic
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Bad room-creation or diagnostic secret
    #[error("Unauthorized")]
    Unauthorized,

    /// Unknown peer
    #[error("Unknown peer")]
    UnknownPeer,

    /// The connection's outbound queue is full
    #[error("Outbound queue full")]
    QueueFull,

    /// Registry operation failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Socket bind or serve failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignalingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SignalingError::Unauthorized => StatusCode::UNAUTHORIZED,
            SignalingError::UnknownPeer => StatusCode::NOT_FOUND,
            SignalingError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            SignalingError::Registry(_) | SignalingError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Administrative endpoints answer failures as `{"ok": false, "error": ...}`
impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("request failed: {self}");
        }
        (status, Json(json!({"ok": false, "error": self.to_string()}))).into_response()
    }
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Connection was closed
    #[error("Connection closed")]
    Close,

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unsupported message type
    #[error("Unsupported message type")]
    UnsupportedType,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}
