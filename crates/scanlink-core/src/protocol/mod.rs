//! Protocol module containing the relay message vocabulary, the JSON codec,
//! and the close codes the relay sends when it terminates a connection.

pub mod close;
pub mod codec;
pub mod messages;

pub use close::{close_code, CloseReason};
pub use codec::{decode_frame, encode_frame, iso_timestamp, ProtocolError};
pub use messages::*;
