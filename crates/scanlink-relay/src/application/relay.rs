//! Pairing relay: routes frames between the two peers of a session.
//!
//! The relay has three entry points, one per connection lifecycle event:
//!
//! ```text
//! on_connect     register the slot, ack the newcomer, tell both peers
//!                about each other when the session becomes paired
//! on_message     decode one text frame and forward / answer / drop it
//! on_disconnect  free the slot (if still current) and tell the survivor
//! ```
//!
//! Delivery is best-effort and at-most-once: a frame for a role that is not
//! online is dropped, and a frame that cannot be queued is never retried.
//! Relayed frames are forwarded as the exact text the sender produced.

use std::sync::Arc;

use tracing::{debug, info, warn};

use scanlink_core::{decode_frame, encode_frame, iso_timestamp, PeerStatus, RelayMessage, Role};

use crate::application::registry::{ConnectionHandle, ConnectionRegistry, Registration, Removal};

/// What [`PairingRelay::on_message`] did with a frame.
///
/// The transport ignores this; it exists so the routing rules can be
/// asserted directly in tests and summarised in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Forwarded verbatim to the peer with this role.
    Forwarded(Role),
    /// Relayable, but the target role is not online for this session.
    NoPeer(Role),
    /// Relayable, but the peer's queue refused it (stalled or closing).
    PeerUnavailable(Role),
    /// A `ping` or `heartbeat` answered on the sender's own connection.
    AnsweredLocally,
    /// A liveness reply that needs no answer.
    Consumed,
    /// A recognised type that this sender is not allowed to relay.
    NotRelayable,
    /// An unrecognised `type`.
    Unknown,
    /// Not JSON, or a known type missing a required field.
    Malformed,
}

/// Routes frames between paired peers using an injected registry.
#[derive(Debug, Clone)]
pub struct PairingRelay {
    registry: Arc<ConnectionRegistry>,
}

impl PairingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Registers a newly accepted connection and emits pairing notifications.
    ///
    /// The newcomer always receives a `connection` ack first.  If the opposite
    /// role is already online, the newcomer then receives
    /// `{peer_role}_status: connected` and the existing peer receives
    /// `{new_role}_status: connected`.  A lone peer receives nothing more.
    pub fn on_connect(&self, handle: Arc<ConnectionHandle>) -> Registration {
        let session_id = handle.session_id().clone();
        let role = handle.role();

        // Queued under the registry lock so status frames follow registry
        // order even when both peers connect and leave at the same time.
        let registration = self.registry.register_with(Arc::clone(&handle), |current, peer| {
            let ack = RelayMessage::connection_ack(
                session_id.clone(),
                role,
                current.id().to_string(),
                iso_timestamp(),
            );
            send_message(current, &ack);

            if let Some(peer) = peer {
                let to_newcomer = RelayMessage::peer_status(
                    peer.role(),
                    PeerStatus::Connected,
                    session_id.clone(),
                    iso_timestamp(),
                );
                send_message(current, &to_newcomer);

                let to_peer = RelayMessage::peer_status(
                    role,
                    PeerStatus::Connected,
                    session_id.clone(),
                    iso_timestamp(),
                );
                send_message(peer, &to_peer);
            }
        });

        match &registration.peer {
            Some(_) => info!("session={session_id}: {role} joined, session is paired"),
            None => {
                info!("session={session_id}: {role} joined, waiting for {}", role.opposite());
            }
        }

        registration
    }

    /// Handles one inbound text frame from `sender`.
    ///
    /// Bad frames are logged and dropped; they never close the connection.
    pub fn on_message(&self, sender: &ConnectionHandle, text: &str) -> Dispatch {
        let session_id = sender.session_id();
        let role = sender.role();

        let message = match decode_frame(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("session={session_id} role={role}: dropping malformed frame: {e}");
                return Dispatch::Malformed;
            }
        };

        let dispatch = match &message {
            RelayMessage::Ping { .. } => {
                let pong = RelayMessage::Pong {
                    session_id: Some(session_id.clone()),
                    timestamp: Some(iso_timestamp().into()),
                };
                send_message(sender, &pong);
                Dispatch::AnsweredLocally
            }
            RelayMessage::Heartbeat { .. } => {
                let reply = RelayMessage::HeartbeatResponse {
                    session_id: Some(session_id.clone()),
                    timestamp: Some(iso_timestamp().into()),
                };
                send_message(sender, &reply);
                Dispatch::AnsweredLocally
            }
            RelayMessage::HeartbeatResponse { .. } | RelayMessage::Pong { .. } => Dispatch::Consumed,
            RelayMessage::Unknown => Dispatch::Unknown,
            relayable => match relayable.relay_target(role) {
                Some(target) => self.forward(sender, target, text),
                None => Dispatch::NotRelayable,
            },
        };

        debug!(
            "session={session_id} role={role}: {} -> {dispatch:?}",
            message.kind_name()
        );
        dispatch
    }

    /// Frees the connection's slot and tells the surviving peer.
    ///
    /// Returns `true` if a `disconnected` notification was queued.  A handle
    /// that was already superseded removes nothing and notifies nobody.
    pub fn on_disconnect(&self, handle: &ConnectionHandle) -> bool {
        let session_id = handle.session_id();
        let role = handle.role();

        let mut notified = false;
        let removal = self.registry.remove_with(handle, |peer| {
            let notice = RelayMessage::peer_status(
                role,
                PeerStatus::Disconnected,
                session_id.clone(),
                iso_timestamp(),
            );
            notified = send_message(peer, &notice);
        });

        match removal {
            Removal::Removed { peer: Some(peer) } => {
                info!("session={session_id}: {role} left, notified {}", peer.role());
            }
            Removal::Removed { peer: None } => {
                info!("session={session_id}: {role} left, session is empty");
            }
            Removal::NotCurrent => {
                debug!(
                    "session={session_id} role={role}: connection {} already superseded",
                    handle.id()
                );
            }
        }
        notified
    }

    fn forward(&self, sender: &ConnectionHandle, target: Role, text: &str) -> Dispatch {
        let Some(peer) = self.registry.lookup(sender.session_id(), target) else {
            return Dispatch::NoPeer(target);
        };
        match peer.send_text(text.to_string()) {
            Ok(()) => Dispatch::Forwarded(target),
            Err(e) => {
                debug!(
                    "session={} role={target}: relay dropped: {e}",
                    sender.session_id()
                );
                Dispatch::PeerUnavailable(target)
            }
        }
    }
}

/// Encodes and queues a relay-originated frame.  Returns `true` if queued.
fn send_message(handle: &ConnectionHandle, message: &RelayMessage) -> bool {
    let text = match encode_frame(message) {
        Ok(t) => t,
        Err(e) => {
            warn!("failed to encode {} frame: {e}", message.kind_name());
            return false;
        }
    };
    match handle.send_text(text) {
        Ok(()) => true,
        Err(e) => {
            debug!(
                "session={} role={}: {} not delivered: {e}",
                handle.session_id(),
                handle.role(),
                message.kind_name()
            );
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
