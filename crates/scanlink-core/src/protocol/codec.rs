//! JSON codec for relay frames.
//!
//! Wire format: one WebSocket text frame carries exactly one JSON object with
//! at least a `"type"` field.  There is no length prefix or envelope beyond
//! what WebSocket framing already provides.

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use crate::protocol::messages::RelayMessage;

/// Errors that can occur while parsing paths or decoding frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The role segment of a connection path was not `pos` or `scanner`.
    #[error("invalid role: {0:?}")]
    InvalidRole(String),

    /// The session segment was empty, too long, or contained illegal characters.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// The request path did not have the `/{role}/{sessionId}` shape.
    #[error("invalid connection path: {0:?}")]
    InvalidPath(String),

    /// The frame was not a JSON object, had no `type`, or a known type was
    /// missing a required field.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Decodes one text frame into a [`RelayMessage`].
///
/// Unrecognised `type` values succeed and yield [`RelayMessage::Unknown`];
/// only structurally broken frames are errors.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] if `text` is not valid JSON, has
/// no `type` field, or is missing a field required by its type.
///
/// # Examples
///
/// ```rust
/// use scanlink_core::{decode_frame, RelayMessage};
///
/// let msg = decode_frame(r#"{"type":"ping"}"#).unwrap();
/// assert!(matches!(msg, RelayMessage::Ping { .. }));
/// assert!(decode_frame("not json").is_err());
/// ```
pub fn decode_frame(text: &str) -> Result<RelayMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

/// Encodes a [`RelayMessage`] as the text of one WebSocket frame.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] if serialisation fails, which
/// only happens for `Value` payloads containing non-string map keys.
pub fn encode_frame(msg: &RelayMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

/// Returns the current UTC time as an RFC 3339 string with millisecond
/// precision and a `Z` suffix, e.g. `2024-05-01T12:34:56.789Z`.
///
/// This matches what `new Date().toISOString()` produces in a browser.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
