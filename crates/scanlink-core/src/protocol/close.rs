//! WebSocket close codes and the reasons the relay attaches to them.
//!
//! Codes follow RFC 6455 §7.4.1.  The relay always sends a human-readable
//! reason when it closes a connection on its own initiative, and the peer
//! client uses the code to decide whether (and how soon) to reconnect.

use std::borrow::Cow;
use std::fmt;

/// Numeric close codes used by the relay and the peer client.
pub mod close_code {
    /// Normal closure; the purpose of the connection was fulfilled.
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away (server shutdown, idle eviction, page unload).
    pub const GOING_AWAY: u16 = 1001;
    /// Reserved: connection dropped without a close frame.  Never sent.
    pub const ABNORMAL: u16 = 1006;
    /// Message violated the endpoint's policy (bad handshake path).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Unexpected condition inside the server.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Server is restarting.
    pub const SERVICE_RESTART: u16 = 1012;
    /// Server is overloaded; try again later.
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// A close code plus the reason string sent alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: Cow<'static, str>,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The path was not `/{role}/{sessionId}`.
    pub fn invalid_handshake() -> Self {
        Self::new(
            close_code::POLICY_VIOLATION,
            "Invalid connection type or sessionId",
        )
    }

    /// A newer connection took over the same (session, role) slot.
    ///
    /// Sent with a normal code so the displaced client does not start a
    /// reconnect loop that would in turn displace the newer connection.
    pub fn superseded() -> Self {
        Self::new(close_code::NORMAL, "Superseded by a new connection")
    }

    /// No frame arrived within the idle timeout.
    pub fn idle_timeout() -> Self {
        Self::new(close_code::GOING_AWAY, "Connection idle timeout")
    }

    /// The peer's outbound queue filled up.
    pub fn stalled() -> Self {
        Self::new(close_code::TRY_AGAIN_LATER, "Peer not reading fast enough")
    }

    /// The relay process is stopping.
    pub fn shutdown() -> Self {
        Self::new(close_code::GOING_AWAY, "Server shutting down")
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_handshake_uses_policy_violation() {
        let reason = CloseReason::invalid_handshake();
        assert_eq!(reason.code, 1008);
        assert_eq!(reason.reason, "Invalid connection type or sessionId");
    }

    #[test]
    fn test_superseded_is_a_normal_closure() {
        assert_eq!(CloseReason::superseded().code, close_code::NORMAL);
    }

    #[test]
    fn test_shutdown_and_idle_are_distinct_going_away_reasons() {
        let shutdown = CloseReason::shutdown();
        let idle = CloseReason::idle_timeout();
        assert_eq!(shutdown.code, close_code::GOING_AWAY);
        assert_eq!(idle.code, close_code::GOING_AWAY);
        assert_ne!(shutdown.reason, idle.reason);
    }

    #[test]
    fn test_display_includes_code() {
        assert_eq!(
            CloseReason::stalled().to_string(),
            "Peer not reading fast enough (1013)"
        );
    }
}
