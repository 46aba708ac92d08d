//! Domain types: peer roles, session identifiers, and connection paths.
//!
//! These are pure value types.  Nothing in this module performs I/O.

pub mod session;

pub use session::{ConnectionPath, Role, SessionId};
