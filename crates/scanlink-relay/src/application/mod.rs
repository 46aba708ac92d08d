//! Application layer for scanlink-relay.
//!
//! The application layer holds the relay's rules: it knows *what* to do with
//! a connect, a frame, or a disconnect, but never opens a socket itself.
//!
//! # Responsibilities
//!
//! - Keeping exactly one live handle per `(session, role)` slot
//! - Deciding which frames are forwarded, answered locally, or dropped
//! - Emitting `connection` and `*_status` frames on pairing changes
//! - Sweeping for idle connections and logging registry snapshots
//!
//! # What does NOT belong here?
//!
//! - Accepting TCP connections or WebSocket framing (that is infrastructure)
//! - Tokio task spawning and timers (also infrastructure)

pub mod heartbeat;
pub mod registry;
pub mod relay;

pub use heartbeat::{HeartbeatMonitor, SweepReport};
pub use registry::{
    ConnectionHandle, ConnectionRegistry, HandleIo, Outbound, Registration, Removal, SendError,
};
pub use relay::{Dispatch, PairingRelay};
