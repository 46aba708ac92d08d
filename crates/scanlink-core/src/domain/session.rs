//! Peer roles, session identifiers, and the `/{role}/{sessionId}` path.
//!
//! # How pairing works (for beginners)
//!
//! The POS terminal invents a session ID and shows it to the phone as a QR
//! code.  Both devices then connect to the relay with URLs that embed the
//! same ID:
//!
//! ```text
//! POS:     ws://relay:3001/pos/ABC123
//! Scanner: ws://relay:3001/scanner/ABC123
//! ```
//!
//! The relay pairs the two connections purely by matching session IDs.  The
//! ID is opaque and case-sensitive: `ABC123` and `abc123` are two different
//! sessions.  Characters that are not URL-safe travel percent-encoded.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Longest session ID, in bytes, the relay will accept in a connection path.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Everything except RFC 3986 unreserved characters is escaped in a path
/// segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ── Role ──────────────────────────────────────────────────────────────────────

/// Which of the two fixed participant kinds a connection represents.
///
/// Serialises as the lowercase string used in connection paths and status
/// message names (`"pos"`, `"scanner"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The desktop point-of-sale session that consumes scanned barcodes.
    Pos,
    /// The mobile device acting as a barcode scanner.
    Scanner,
}

impl Role {
    /// Both roles, in a stable order.  Handy for iterating over a session.
    pub const ALL: [Role; 2] = [Role::Pos, Role::Scanner];

    /// Returns the counterpart role: the peer this role is paired with.
    pub fn opposite(self) -> Role {
        match self {
            Role::Pos => Role::Scanner,
            Role::Scanner => Role::Pos,
        }
    }

    /// Returns the lowercase wire name of this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Pos => "pos",
            Role::Scanner => "scanner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pos" => Ok(Role::Pos),
            "scanner" => Ok(Role::Scanner),
            other => Err(ProtocolError::InvalidRole(other.to_string())),
        }
    }
}

// ── SessionId ─────────────────────────────────────────────────────────────────

/// Opaque correlation key shared out-of-band between a POS and a scanner.
///
/// The only rule is that the decoded ID fits in one URL path segment: it is
/// non-empty, contains no `/`, and is at most [`MAX_SESSION_ID_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validates `raw` and wraps it in a `SessionId`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidSessionId`] if `raw` is empty, too
    /// long, or contains a `/`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scanlink_core::SessionId;
    ///
    /// assert!(SessionId::parse("order.42").is_ok());
    /// assert!(SessionId::parse("a/b").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let valid = !raw.is_empty() && raw.len() <= MAX_SESSION_ID_LEN && !raw.contains('/');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(ProtocolError::InvalidSessionId(raw.to_string()))
        }
    }

    /// Returns the session ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── ConnectionPath ────────────────────────────────────────────────────────────

/// The `(role, session)` pair carried by a connection URL path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionPath {
    pub role: Role,
    pub session_id: SessionId,
}

impl ConnectionPath {
    pub fn new(role: Role, session_id: SessionId) -> Self {
        Self { role, session_id }
    }

    /// Parses a request path of the form `/{role}/{sessionId}`.
    ///
    /// A query string (`?...`) is ignored and the session segment is
    /// percent-decoded.  A single trailing slash is tolerated, but any
    /// additional path segment is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPath`] when the path does not have
    /// exactly two segments, and the role/session errors when either segment
    /// fails validation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scanlink_core::{ConnectionPath, Role};
    ///
    /// let path = ConnectionPath::parse("/scanner/ABC123").unwrap();
    /// assert_eq!(path.role, Role::Scanner);
    /// assert_eq!(path.session_id.as_str(), "ABC123");
    /// ```
    pub fn parse(path: &str) -> Result<Self, ProtocolError> {
        let path = path.split('?').next().unwrap_or_default();
        let trimmed = path
            .strip_prefix('/')
            .ok_or_else(|| ProtocolError::InvalidPath(path.to_string()))?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let mut segments = trimmed.split('/');
        let (Some(role), Some(session), None) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(ProtocolError::InvalidPath(path.to_string()));
        };

        let decoded = percent_decode_str(session)
            .decode_utf8()
            .map_err(|_| ProtocolError::InvalidSessionId(session.to_string()))?;

        Ok(Self {
            role: role.parse()?,
            session_id: SessionId::parse(&decoded)?,
        })
    }

    /// Renders the path back into `/{role}/{sessionId}` form, escaping the
    /// session ID.
    pub fn to_path(&self) -> String {
        format!(
            "/{}/{}",
            self.role,
            utf8_percent_encode(self.session_id.as_str(), SEGMENT)
        )
    }
}

impl fmt::Display for ConnectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.session_id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
