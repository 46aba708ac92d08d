//! JSON message types for the relay's WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Scanner → Relay → POS:      barcode
//! POS     → Relay → Scanner:  command
//! Relay   → either peer:      connection, pos_status, scanner_status, pong,
//!                             heartbeat_response
//! Either  → Relay (local):    ping, heartbeat, heartbeat_response
//! ```
//!
//! # JSON discriminant
//!
//! Every frame is a single JSON object with a `"type"` field that identifies
//! the variant.  All other fields live in the same object:
//!
//! ```json
//! {"type":"barcode","code":"0123456789","timestamp":1700000000000}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles this automatically.
//! Types the relay does not recognise decode to [`RelayMessage::Unknown`]
//! instead of failing, so a newer client can never crash an older relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::session::{Role, SessionId};

/// Connected/disconnected state carried by `connection` and `*_status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Connected,
    Disconnected,
}

/// Every frame that can travel over a relay WebSocket.
///
/// Server-originated variants carry a `sessionId` and an ISO-8601
/// `timestamp`.  Client-originated variants keep their timestamp as raw JSON
/// because browsers send either `Date.now()` numbers or ISO strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Server → client: acknowledges a newly accepted connection.
    Connection {
        status: PeerStatus,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        role: Role,
        /// Server-assigned identifier of this connection, for log correlation.
        #[serde(rename = "connectionId", default, skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
        timestamp: String,
    },

    /// Server → scanner: the POS peer connected or disconnected.
    PosStatus {
        status: PeerStatus,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        timestamp: String,
    },

    /// Server → POS: the scanner peer connected or disconnected.
    ScannerStatus {
        status: PeerStatus,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        timestamp: String,
    },

    /// Scanner → POS: a scanned code.  The relay never interprets it, so
    /// any JSON value is accepted (some scanner pages send numeric codes).
    Barcode {
        code: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
        /// Free-form description of the scanning device.
        #[serde(rename = "deviceInfo", default, skip_serializing_if = "Option::is_none")]
        device_info: Option<Value>,
    },

    /// POS → scanner: an opaque instruction (e.g. "pause camera").
    Command {
        command: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },

    /// Either → server: keepalive.  Answered with [`RelayMessage::Pong`].
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },

    /// Server → client: the relay's answer to a `ping`.
    Pong {
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },

    /// Either → server: keepalive.  Answered with
    /// [`RelayMessage::HeartbeatResponse`].
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },

    /// Answer to a `heartbeat`.  Consumed locally when a client sends it.
    HeartbeatResponse {
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },

    /// Any `type` the relay does not recognise.  Logged and dropped.
    #[serde(other)]
    Unknown,
}

impl RelayMessage {
    /// Builds the `connection` acknowledgement sent to a newly accepted peer.
    pub fn connection_ack(
        session_id: SessionId,
        role: Role,
        connection_id: impl Into<String>,
        timestamp: String,
    ) -> Self {
        RelayMessage::Connection {
            status: PeerStatus::Connected,
            session_id,
            role,
            connection_id: Some(connection_id.into()),
            timestamp,
        }
    }

    /// Builds the `{about}_status` frame telling one peer what happened to
    /// the other.  `about` is the role whose state changed.
    ///
    /// ```rust
    /// use scanlink_core::{PeerStatus, RelayMessage, Role, SessionId};
    ///
    /// let sid = SessionId::parse("ABC").unwrap();
    /// let msg = RelayMessage::peer_status(Role::Pos, PeerStatus::Connected, sid, "t".into());
    /// assert_eq!(msg.kind_name(), "pos_status");
    /// ```
    pub fn peer_status(
        about: Role,
        status: PeerStatus,
        session_id: SessionId,
        timestamp: String,
    ) -> Self {
        match about {
            Role::Pos => RelayMessage::PosStatus {
                status,
                session_id,
                timestamp,
            },
            Role::Scanner => RelayMessage::ScannerStatus {
                status,
                session_id,
                timestamp,
            },
        }
    }

    /// Returns the wire name of this message's `type`.
    ///
    /// Used in log messages instead of `Debug` so that scanned codes and
    /// commands never end up in the logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RelayMessage::Connection { .. } => "connection",
            RelayMessage::PosStatus { .. } => "pos_status",
            RelayMessage::ScannerStatus { .. } => "scanner_status",
            RelayMessage::Barcode { .. } => "barcode",
            RelayMessage::Command { .. } => "command",
            RelayMessage::Ping { .. } => "ping",
            RelayMessage::Pong { .. } => "pong",
            RelayMessage::Heartbeat { .. } => "heartbeat",
            RelayMessage::HeartbeatResponse { .. } => "heartbeat_response",
            RelayMessage::Unknown => "unknown",
        }
    }

    /// Returns the role this message should be forwarded to when `sender`
    /// sent it, or `None` if it must not be relayed.
    ///
    /// Only two directions exist: `barcode` from a scanner goes to the POS,
    /// and `command` from a POS goes to the scanner.  A `barcode` sent by a
    /// POS (or a `command` sent by a scanner) is not relayable.
    pub fn relay_target(&self, sender: Role) -> Option<Role> {
        match (self, sender) {
            (RelayMessage::Barcode { .. }, Role::Scanner) => Some(Role::Pos),
            (RelayMessage::Command { .. }, Role::Pos) => Some(Role::Scanner),
            _ => None,
        }
    }

    /// `true` for the liveness family that is always answered locally.
    pub fn is_liveness(&self) -> bool {
        matches!(
            self,
            RelayMessage::Ping { .. }
                | RelayMessage::Pong { .. }
                | RelayMessage::Heartbeat { .. }
                | RelayMessage::HeartbeatResponse { .. }
        )
    }

    /// `true` for frames only the relay may originate.
    pub fn is_server_originated(&self) -> bool {
        matches!(
            self,
            RelayMessage::Connection { .. }
                | RelayMessage::PosStatus { .. }
                | RelayMessage::ScannerStatus { .. }
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
