//! HTTP handlers for the administrative surface
//!
//! Room creation and the room listing are gated by one shared secret. The
//! WebSocket endpoint lives in [`crate::socket`].

use crate::error::SignalingError;
use crate::registry::RoomFilter;
use crate::router::SignalingRouter;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SignalingRouter>,
    admin_password: Arc<str>,
}

impl AppState {
    pub fn new(router: Arc<SignalingRouter>, admin_password: &str) -> Self {
        Self {
            router,
            admin_password: Arc::from(admin_password),
        }
    }

    fn authorize(&self, password: Option<&str>) -> Result<(), SignalingError> {
        match password {
            Some(given) if !given.is_empty() && secrets_match(given, &self.admin_password) => {
                Ok(())
            }
            _ => Err(SignalingError::Unauthorized),
        }
    }
}

/// Byte comparison whose running time does not depend on where inputs differ
fn secrets_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[derive(Debug, Default, Deserialize)]
struct CreateRoomBody {
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoomsQuery {
    password: Option<String>,
    prefix: Option<String>,
    min_members: Option<usize>,
}

/// POST /create-room
pub async fn create_room(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, SignalingError> {
    // A missing or malformed body is just an unauthorized request
    let body: CreateRoomBody = serde_json::from_slice(&body).unwrap_or_default();

    state.authorize(body.password.as_deref()).inspect_err(|_| {
        warn!("room creation with bad password");
    })?;

    let created = state.router.registry().create_room()?;
    info!(code = %created.code, "room created");

    Ok(Json(json!({
        "ok": true,
        "code": created.code,
        "adminToken": created.admin_token,
    })))
}

/// GET /rooms
pub async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<RoomsQuery>,
) -> Result<Json<Value>, SignalingError> {
    state.authorize(query.password.as_deref())?;

    let filter = RoomFilter {
        code_prefix: query.prefix,
        min_members: query.min_members.unwrap_or(0),
    };
    let rooms: BTreeMap<String, Value> = state
        .router
        .registry()
        .snapshot(&filter)
        .into_iter()
        .map(|(code, count)| (code.0, json!({ "count": count })))
        .collect();

    Ok(Json(json!({"ok": true, "rooms": rooms})))
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}
