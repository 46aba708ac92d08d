//! scanlink-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does scanlink-client do? (for beginners)
//!
//! A ScanLink session has two peers: a phone that scans barcodes and a POS
//! terminal that consumes them.  Both connect to the relay with the same
//! session ID.  This crate is the peer side of that conversation, for
//! either role.
//!
//! The client:
//!
//! 1. Connects to `ws://relay/{role}/{sessionId}`.
//! 2. Reports pairing changes (`pos_status` / `scanner_status`) and relayed
//!    payloads (barcodes or commands) as [`ClientEvent`]s.
//! 3. Sends a `ping` every 30 seconds so proxies keep the socket open.
//! 4. Suppresses repeated scans of the same barcode within a short window.
//! 5. Reconnects with exponential backoff after an abnormal close, up to a
//!    fixed number of attempts, and then waits for a manual retry.
//!
//! # Layers
//!
//! ```text
//! domain/          ClientConfig, ReconnectPolicy, ConnectionState (pure data)
//! application/     reconnect state machine, barcode de-duplication
//! infrastructure/  WebSocket session runner and its handle
//! ```
//!
//! [`ClientEvent`]: infrastructure::ClientEvent

/// Domain layer: configuration and state types (no I/O).
pub mod domain;

/// Application layer: reconnect decisions and barcode de-duplication.
pub mod application;

/// Infrastructure layer: the WebSocket session runner.
pub mod infrastructure;
