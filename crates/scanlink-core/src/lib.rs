//! # scanlink-core
//!
//! Shared library for ScanLink containing the wire vocabulary spoken between
//! the pairing relay and its two kinds of peers.
//!
//! This crate is used by both the relay server and the peer client.
//! It has zero dependencies on sockets, async runtimes, or UI frameworks.
//!
//! # Architecture overview (for beginners)
//!
//! ScanLink lets a mobile phone act as a barcode scanner for a desktop
//! point-of-sale (POS) session.  The two devices never talk to each other
//! directly.  Instead, both open a WebSocket to a relay server using the same
//! *session ID* (shown to the phone as a QR code), and the relay forwards
//! messages between them.
//!
//! This crate (`scanlink-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Who is talking: the [`Role`] of a peer (`pos` or
//!   `scanner`), the opaque [`SessionId`] that pairs them, and the
//!   `/{role}/{sessionId}` connection path that carries both.
//!
//! - **`protocol`** – What they say: the [`RelayMessage`] tagged union that
//!   every JSON frame decodes into, the codec helpers, and the WebSocket close
//!   codes the relay uses when it terminates a connection.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `scanlink_core::Role` instead of `scanlink_core::domain::session::Role`.
pub use domain::session::{ConnectionPath, Role, SessionId};
pub use protocol::close::{close_code, CloseReason};
pub use protocol::codec::{decode_frame, encode_frame, iso_timestamp, ProtocolError};
pub use protocol::messages::{PeerStatus, RelayMessage};
