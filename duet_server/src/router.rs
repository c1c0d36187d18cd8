//! Signaling router
//!
//! Binds registry state changes to per-connection notifications and relays
//! opaque negotiation payloads between connections. This is the only place
//! that knows about live transports: each connection is represented by the
//! sending half of its outbound event queue.
//!
//! Join and leave notifications are queued while the registry outcome is
//! still held, so every connection observes membership changes in the order
//! the registry applied them. Relay is identity-addressed and best-effort:
//! a payload for a connection that is gone is dropped without telling the
//! sender. Outbound queues are bounded; an event for a connection whose
//! queue is full is dropped the same way.

use crate::error::SignalingError;
use crate::registry::{Departure, RoomRegistry};
use duet_protocol::{PeerEvent, PeerId, PeerRequest, RoomCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Sending half of a connection's outbound event queue
pub type PeerSender = mpsc::Sender<PeerEvent>;

/// Capacity of each connection's outbound event queue
pub const OUTBOUND_QUEUE: usize = 100;

const MISSING_ROOM_CODE: &str = "Missing room code";
const MISSING_SIGNAL_PAYLOAD: &str = "Missing signal payload";
const INVALID_MESSAGE: &str = "Invalid message";

/// Per-connection event handling on top of a shared [`RoomRegistry`]
pub struct SignalingRouter {
    registry: Arc<RoomRegistry>,
    transports: Mutex<HashMap<PeerId, PeerSender>>,
}

impl std::fmt::Debug for SignalingRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingRouter")
            .field("registry", &self.registry)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl SignalingRouter {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            transports: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    fn transports(&self) -> MutexGuard<'_, HashMap<PeerId, PeerSender>> {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the outbound queue of a newly established connection
    pub fn connect(&self, peer: PeerId, sender: PeerSender) {
        self.transports().insert(peer, sender);
        info!(%peer, "peer connected");
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.transports().contains_key(&peer)
    }

    pub fn connection_count(&self) -> usize {
        self.transports().len()
    }

    /// Dispatch one decoded request from `peer`
    pub fn handle_request(&self, peer: PeerId, request: PeerRequest) {
        match request {
            PeerRequest::JoinRoom { room } => self.on_join_request(peer, &room),
            PeerRequest::LeaveRoom => self.on_leave_request(peer),
            PeerRequest::Signal { to, data } => self.on_relay(peer, to, data),
            PeerRequest::KeepAlive => {}
        }
    }

    /// Try to admit `peer` to the room `code`
    ///
    /// A failed join is reported to the requester only and leaves it free
    /// to try another code. A connection bound to a different room moves
    /// out of it only once the new room has accepted it; a refused join
    /// keeps the current seat.
    pub fn on_join_request(&self, peer: PeerId, code: &RoomCode) {
        if code.is_empty() {
            self.notify(peer, PeerEvent::error(MISSING_ROOM_CODE));
            return;
        }

        match self.registry.admit_moving(code, peer) {
            Ok(admission) => {
                if let Some(departed) = admission.departed() {
                    self.announce_departure(peer, departed);
                }
                info!(%peer, room = %admission.code(), "peer joined room");
                self.notify(
                    peer,
                    PeerEvent::Joined {
                        you: peer,
                        others: admission.peers().to_vec(),
                    },
                );
                for other in admission.peers() {
                    self.notify(*other, PeerEvent::PeerJoined { id: peer });
                }
            }
            Err(e) => {
                warn!(%peer, room = %code, "join refused: {e}");
                self.notify(peer, PeerEvent::error(e.to_string()));
            }
        }
    }

    /// Explicit leave; a no-op for a connection that is in no room
    pub fn on_leave_request(&self, peer: PeerId) {
        self.leave(peer);
    }

    /// Transport-detected loss of `peer`
    ///
    /// Same effect on membership as a leave, then the transport is
    /// forgotten so later relays to it are dropped.
    pub fn on_disconnect(&self, peer: PeerId) {
        self.leave(peer);
        if self.transports().remove(&peer).is_some() {
            info!(%peer, "peer disconnected");
        }
    }

    /// Forward `data` from `from` to `to`, verbatim
    ///
    /// Co-membership is not checked. Unknown or vanished targets are dropped
    /// silently.
    pub fn on_relay(&self, from: PeerId, to: PeerId, data: serde_json::Value) {
        if data.is_null() {
            self.notify(from, PeerEvent::error(MISSING_SIGNAL_PAYLOAD));
            return;
        }

        if let Err(e) = self.deliver(to, PeerEvent::Signal { from, data }) {
            debug!(%from, %to, "dropping signal: {e}");
        }
    }

    /// Tell `peer` that a frame it sent could not be decoded
    pub fn on_invalid_message(&self, peer: PeerId) {
        self.notify(peer, PeerEvent::error(INVALID_MESSAGE));
    }

    fn leave(&self, peer: PeerId) {
        if let Some(eviction) = self.registry.evict(peer) {
            self.announce_departure(peer, eviction.departure());
        }
    }

    fn announce_departure(&self, peer: PeerId, departure: &Departure) {
        info!(
            %peer,
            room = %departure.code,
            deleted = departure.room_deleted,
            "peer left room"
        );
        for other in &departure.remaining {
            self.notify(*other, PeerEvent::PeerLeft { id: peer });
        }
    }

    /// Queue an event, treating a vanished receiver as a benign race
    fn notify(&self, peer: PeerId, event: PeerEvent) {
        if let Err(e) = self.deliver(peer, event) {
            debug!(%peer, "notification not delivered: {e}");
        }
    }

    fn deliver(&self, peer: PeerId, event: PeerEvent) -> Result<(), SignalingError> {
        let transports = self.transports();
        let sender = transports.get(&peer).ok_or(SignalingError::UnknownPeer)?;
        sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!(%peer, "outbound queue full, dropping event");
                SignalingError::QueueFull
            }
            TrySendError::Closed(_) => SignalingError::UnknownPeer,
        })
    }
}
