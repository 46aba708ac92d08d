//! Application layer for scanlink-client.
//!
//! Decisions with no I/O: when and how soon to reconnect, and whether a
//! barcode is a repeat.  The infrastructure runner drives both.

pub mod dedup;
pub mod reconnect;

pub use dedup::{BarcodeDeduplicator, Clock, SystemClock};
pub use reconnect::{CloseDecision, ReconnectMachine, CONNECT_FAILED};
