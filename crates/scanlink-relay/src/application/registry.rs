//! In-memory connection registry: the single source of truth for "who is
//! online".
//!
//! The registry maps each `(session, role)` slot to at most one live
//! [`ConnectionHandle`].  Registration and removal race with each other
//! because both roles connect and disconnect independently, so every
//! operation runs under one mutex and returns everything the caller needs
//! (superseded handle, current peer) from the same critical section.
//!
//! # Handles and queues
//!
//! A handle never owns the socket.  It owns the *sending* side of a bounded
//! outbound queue and a close signal; the connection's writer task owns the
//! receiving side (see [`HandleIo`]).  Anything that wants to talk to a peer
//! goes through the handle, so no task ever touches another task's socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use scanlink_core::{CloseReason, Role, SessionId};

// ── Outbound queue ────────────────────────────────────────────────────────────

/// One item in a connection's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A JSON text frame, already encoded.
    Text(String),
    /// A WebSocket protocol-level Ping control frame.
    Ping,
}

/// Why a send to a handle did not enqueue.
#[derive(Debug, Error, PartialEq)]
pub enum SendError {
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,

    /// The outbound queue was full.  The handle has been told to close.
    #[error("connection stalled: outbound queue full")]
    Stalled,
}

/// The receiving ends that the connection's writer task drives.
pub struct HandleIo {
    /// Frames queued for this connection by the relay.
    pub outbound_rx: mpsc::Receiver<Outbound>,
    /// Set once when someone asks the connection to close.
    pub close_rx: watch::Receiver<Option<CloseReason>>,
}

// ── ConnectionHandle ──────────────────────────────────────────────────────────

/// The relay's live reference to one peer's open connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    session_id: SessionId,
    role: Role,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    outbound_tx: mpsc::Sender<Outbound>,
    close_tx: watch::Sender<Option<CloseReason>>,
}

impl ConnectionHandle {
    /// Creates a handle with an outbound queue of `queue_capacity` frames.
    ///
    /// Returns the shared handle plus the receiving ends for the writer task.
    pub fn new(session_id: SessionId, role: Role, queue_capacity: usize) -> (Arc<Self>, HandleIo) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (close_tx, close_rx) = watch::channel(None);
        let now = Instant::now();
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            connected_at: now,
            last_seen: Mutex::new(now),
            outbound_tx,
            close_tx,
        });
        (
            handle,
            HandleIo {
                outbound_rx,
                close_rx,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Records that a frame (of any kind) just arrived on this connection.
    pub fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    /// The monotonic instant of the most recent inbound frame.
    pub fn last_seen(&self) -> Instant {
        *lock(&self.last_seen)
    }

    /// Time since the most recent inbound frame, measured against `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    /// Queues a text frame without waiting.
    ///
    /// A full queue means the peer is not reading; rather than block the
    /// sender's reader task, the handle is told to close and the frame is
    /// dropped.
    ///
    /// # Errors
    ///
    /// [`SendError::Stalled`] when the queue is full, [`SendError::Closed`]
    /// when the writer has already exited.
    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        self.enqueue(Outbound::Text(text))
    }

    /// Queues a protocol-level Ping.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub fn send_ping(&self) -> Result<(), SendError> {
        self.enqueue(Outbound::Ping)
    }

    fn enqueue(&self, item: Outbound) -> Result<(), SendError> {
        match self.outbound_tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "session={} role={}: outbound queue full, closing stalled connection",
                    self.session_id, self.role
                );
                self.close(CloseReason::stalled());
                Err(SendError::Stalled)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Asks the writer task to send a close frame and end the connection.
    ///
    /// Only the first reason is kept; later calls are no-ops.  Returns `true`
    /// if this call set the reason.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    /// The close reason, if one has been requested.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_tx.borrow().clone()
    }

    pub fn is_closing(&self) -> bool {
        self.close_tx.borrow().is_some()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

type SlotKey = (SessionId, Role);

/// Result of [`ConnectionRegistry::register`].
#[derive(Debug)]
pub struct Registration {
    /// The handle that now occupies the slot (the one just registered).
    pub current: Arc<ConnectionHandle>,
    /// The handle that previously occupied the slot, already told to close.
    pub superseded: Option<Arc<ConnectionHandle>>,
    /// The opposite role's handle in the same session, if online.
    pub peer: Option<Arc<ConnectionHandle>>,
}

/// Result of [`ConnectionRegistry::remove`].
#[derive(Debug)]
pub enum Removal {
    /// The handle was current and has been removed.
    Removed {
        /// The opposite role's handle in the same session, if online.
        peer: Option<Arc<ConnectionHandle>>,
    },
    /// The slot holds a different handle (or nothing); nothing was removed.
    NotCurrent,
}

/// Point-in-time copy of every registered handle.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    pub handles: Vec<Arc<ConnectionHandle>>,
}

/// Thread-safe registry of live connections keyed by `(session, role)`.
///
/// Create one per server and share it with `Arc`; independent registries
/// never observe each other.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: Mutex<HashMap<SlotKey, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts `handle` into its `(session, role)` slot.
    ///
    /// Any handle already in the slot is closed with
    /// [`CloseReason::superseded`] before being replaced (last writer wins).
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Registration {
        self.register_with(handle, |_, _| {})
    }

    /// Like [`register`](Self::register), but runs `announce` with the new
    /// handle and its peer before the lock is released.
    ///
    /// Frames queued from `announce` are ordered against every other
    /// registry change in the session, so a peer can never see `connected`
    /// after the `disconnected` that followed it.  `announce` must not block
    /// or call back into the registry.
    pub fn register_with<F>(&self, handle: Arc<ConnectionHandle>, announce: F) -> Registration
    where
        F: FnOnce(&ConnectionHandle, Option<&ConnectionHandle>),
    {
        let key = (handle.session_id.clone(), handle.role);
        let peer_key = (handle.session_id.clone(), handle.role.opposite());

        let mut slots = lock(&self.slots);
        let superseded = slots.remove(&key);
        if let Some(old) = &superseded {
            old.close(CloseReason::superseded());
            info!(
                "session={} role={}: connection {} superseded by {}",
                handle.session_id, handle.role, old.id, handle.id
            );
        }
        slots.insert(key, Arc::clone(&handle));
        let peer = slots.get(&peer_key).cloned();
        announce(&handle, peer.as_deref());
        drop(slots);

        debug!(
            "session={} role={}: registered connection {}",
            handle.session_id, handle.role, handle.id
        );
        Registration {
            current: handle,
            superseded,
            peer,
        }
    }

    /// Non-blocking read of one slot.
    pub fn lookup(&self, session_id: &SessionId, role: Role) -> Option<Arc<ConnectionHandle>> {
        lock(&self.slots).get(&(session_id.clone(), role)).cloned()
    }

    /// Removes `handle` from its slot, but only if it is still the handle
    /// stored there.
    ///
    /// A disconnect for a handle that was already superseded is a no-op, so
    /// it can never delete the newer connection.
    pub fn remove(&self, handle: &ConnectionHandle) -> Removal {
        self.remove_with(handle, |_| {})
    }

    /// Like [`remove`](Self::remove), but runs `farewell` with the surviving
    /// peer before the lock is released.  Not called when nothing was
    /// removed or the session has no peer online.
    pub fn remove_with<F>(&self, handle: &ConnectionHandle, farewell: F) -> Removal
    where
        F: FnOnce(&ConnectionHandle),
    {
        let key = (handle.session_id.clone(), handle.role);
        let peer_key = (handle.session_id.clone(), handle.role.opposite());

        let mut slots = lock(&self.slots);
        let is_current = slots.get(&key).is_some_and(|stored| stored.id == handle.id);
        if !is_current {
            return Removal::NotCurrent;
        }
        slots.remove(&key);
        let peer = slots.get(&peer_key).cloned();
        if let Some(peer) = &peer {
            farewell(peer);
        }
        Removal::Removed { peer }
    }

    /// Copies every registered handle out of the registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            handles: lock(&self.slots).values().cloned().collect(),
        }
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tells every registered handle to close.  Returns how many were asked.
    ///
    /// The handles stay registered; each connection removes itself as its
    /// task winds down.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let handles = self.snapshot().handles;
        for handle in &handles {
            handle.close(reason.clone());
        }
        handles.len()
    }
}

/// Locks a std mutex, recovering the data if a holder panicked.
///
/// Every critical section here is a handful of map operations that leave the
/// map consistent at each step, so a poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
