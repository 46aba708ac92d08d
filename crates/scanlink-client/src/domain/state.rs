//! Connection lifecycle states shown to the user.

use std::fmt;
use std::time::Duration;

/// Where a peer connection is in its lifecycle.
///
/// ```text
/// Connecting ──open──▶ Open ──close──▶ Closing ──▶ Closed
///      ▲                 │                           │
///      │              dropped                        │ abnormal, budget left
///      └──── Reconnecting ◀──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A WebSocket handshake is in progress.
    Connecting,
    /// The socket is open and the relay has accepted the connection.
    Open,
    /// A close was requested locally and the close handshake is running.
    Closing,
    /// The socket is closed and no reconnect is pending.
    Closed,
    /// Waiting `delay` before attempt number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Closing => f.write_str("closing"),
            ConnectionState::Closed => f.write_str("closed"),
            ConnectionState::Reconnecting { attempt, delay } => write!(
                f,
                "reconnecting (attempt {attempt} in {:.1}s)",
                delay.as_secs_f64()
            ),
        }
    }
}
