//! Infrastructure layer for the peer client.
//!
//! Contains the only network-facing code in the crate: the WebSocket session
//! runner that connects to the relay, pumps frames, and reconnects.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`, and
//! `scanlink_core`, but MUST NOT be imported by the `application` or `domain`
//! layers.
//!
//! # Sub-modules
//!
//! - **`session_client`** – [`SessionClient`] (the runner), [`ClientHandle`]
//!   (send barcodes/commands, close, retry), and the [`ClientEvent`] stream
//!   the application consumes.

pub mod session_client;

pub use session_client::{ClientError, ClientEvent, ClientHandle, SessionClient};
