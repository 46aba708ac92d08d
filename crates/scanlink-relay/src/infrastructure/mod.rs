//! Infrastructure layer for scanlink-relay.
//!
//! The infrastructure layer handles all I/O: serving HTTP, answering health
//! checks, upgrading to WebSocket, and moving frames between sockets and the
//! relay's per-connection queues.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and running the axum server
//! - Routing `/{role}/{sessionId}` upgrades, and answering everything else
//!   with the health string
//! - Spawning the heartbeat timer and running per-connection reader/writer
//!   halves
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Pairing and routing decisions (that is the application layer)
//! - Message type definitions (that is `scanlink-core`)
//! - Configuration parsing (that is done in `main.rs`)

pub mod routes;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use routes::{build_router, RelayState, HEALTH_BODY};
pub use ws_server::{run_server, serve};
