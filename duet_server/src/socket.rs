//! WebSocket transport
//!
//! One socket is one connection identity. Incoming text frames are decoded
//! into [`PeerRequest`]s and handled in arrival order; a writer task drains
//! the connection's bounded outbound queue so the router never waits on the
//! network.

use crate::error::ClientRequestError;
use crate::handler::AppState;
use crate::router::{OUTBOUND_QUEUE, SignalingRouter};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use duet_protocol::{PeerEvent, PeerId, PeerRequest};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router))
}

fn parse_request(request: Result<Message, axum::Error>) -> Result<PeerRequest, ClientRequestError> {
    let request = request.map_err(|e| ClientRequestError::WebSocket(e.to_string()))?;

    match request {
        Message::Text(text) => Ok(text.parse()?),
        Message::Close(_) => Err(ClientRequestError::Close),
        _ => Err(ClientRequestError::UnsupportedType),
    }
}

async fn handle_socket(socket: WebSocket, router: Arc<SignalingRouter>) {
    let peer = PeerId::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<PeerEvent>(OUTBOUND_QUEUE);

    router.connect(peer, tx);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(event.to_string())).await {
                debug!(%peer, "send failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match parse_request(frame) {
            Ok(request) => router.handle_request(peer, request),
            Err(ClientRequestError::UnsupportedType) => {
                // ping/pong and binary frames carry no requests
                continue;
            }
            Err(ClientRequestError::Json(e)) => {
                warn!(%peer, "undecodable request: {e}");
                router.on_invalid_message(peer);
            }
            Err(ClientRequestError::Close) => break,
            Err(e) => {
                debug!(%peer, "socket error: {e}");
                break;
            }
        }
    }

    // Drops the last sender of the outbound queue, which ends the writer
    router.on_disconnect(peer);
    if let Err(e) = writer.await {
        debug!(%peer, "writer task ended abnormally: {e}");
    }
}
