//! Domain layer for scanlink-relay.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or external frameworks.  The wire vocabulary itself lives in
//! `scanlink-core` because the peer client shares it.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - Environment variable reading (that is done in `main.rs`)

pub mod config;

pub use config::{RelayConfig, DEFAULT_PORT};
