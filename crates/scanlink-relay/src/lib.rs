//! scanlink-relay library crate.
//!
//! This crate provides the WebSocket pairing relay that lets a mobile phone
//! act as a barcode scanner for a desktop point-of-sale session.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Scanner phone (JSON over WebSocket)      POS terminal (JSON over WebSocket)
//!         ↕  /scanner/{sessionId}                  ↕  /pos/{sessionId}
//! [scanlink-relay]
//!   ├── domain/           Pure types: RelayConfig
//!   ├── application/
//!   │     ├── registry/   (session, role) → live connection handle
//!   │     ├── relay/      connect/message/disconnect routing + status frames
//!   │     └── heartbeat/  periodic liveness sweep and diagnostic snapshot
//!   └── infrastructure/
//!         ├── routes/     axum router: WebSocket route, health fallback
//!         └── ws_server/  serve loop, per-connection reader/writer tasks
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no external dependencies (no I/O, no async, no frameworks).
//! - `application` depends on `domain` and `scanlink-core`, plus tokio's
//!   channel types for the per-connection outbound queue.  It never touches
//!   a socket.
//! - `infrastructure` depends on all other layers plus `tokio` and `axum`.
//!
//! # Why this split?
//!
//! The registry and the relay rules are where the interesting invariants live
//! (one handle per slot, stale-removal guard, exactly-once status
//! notifications).  Keeping them free of sockets means they can be tested
//! with plain channels and an independent registry per test.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: registry, relay rules, and heartbeat sweep.
pub mod application;

/// Infrastructure layer: HTTP router, WebSocket sessions, and health check.
pub mod infrastructure;
