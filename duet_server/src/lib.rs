//! Room-code signaling relay for two-party WebRTC calls
//!
//! An administrator creates a room and shares its short code. Two browsers
//! join the room over a WebSocket and the relay forwards their session
//! negotiation messages (offers, answers, ICE candidates) until they have a
//! direct peer-to-peer path. The negotiation payload is opaque to the relay.
//!
//! # Endpoints
//!
//! - **POST /create-room** - `{"password": "..."}` → `{"ok":true,"code":"a1b2c3","adminToken":"..."}`
//! - **GET /rooms?password=...** - `{"ok":true,"rooms":{"a1b2c3":{"count":1}}}`
//! - **GET /ws** - signaling WebSocket, see [`duet_protocol`]
//! - **GET /health** - Health check
//!
//! # Components
//!
//! - [`RoomRegistry`] owns room code → membership and enforces the
//!   two-member cap with atomic admit/evict.
//! - [`SignalingRouter`] handles join, leave, disconnect and relay for each
//!   connection and turns registry changes into peer notifications.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! ADMIN_PASSWORD=secret duet-signaling --port 3000
//!
//! # Create a room
//! curl -X POST -H "Content-Type: application/json" \
//!   -d '{"password":"secret"}' http://127.0.0.1:3000/create-room
//!
//! # List rooms
//! curl "http://127.0.0.1:3000/rooms?password=secret"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod registry;
pub mod router;
pub mod server;
pub mod socket;

pub use config::ServerConfig;
pub use error::{ClientRequestError, RegistryError, SignalingError};
pub use handler::AppState;
pub use registry::{RoomFilter, RoomRegistry};
pub use router::SignalingRouter;
pub use server::{Server, app};
