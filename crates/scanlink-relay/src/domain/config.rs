//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It can be constructed from CLI arguments (preferred for production) or from
//! sensible defaults (useful for local development and tests).
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the relay easy to embed in tests.
//! `main.rs` is responsible for populating it from CLI args or environment
//! variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Default TCP port the relay listens on.
pub const DEFAULT_PORT: u16 = 3001;

/// All runtime configuration for the pairing relay.
///
/// # Example
///
/// ```rust
/// use scanlink_relay::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 3001);
/// assert!(cfg.bind_addr.ip().is_unspecified());
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// The address and port the WebSocket server binds to.
    ///
    /// `0.0.0.0` accepts connections from any network interface so phones on
    /// the same LAN can reach the relay without any discovery step.
    pub bind_addr: SocketAddr,

    /// How often the heartbeat monitor sweeps the registry.
    ///
    /// Each sweep logs a snapshot, pings every connection at the WebSocket
    /// protocol level, and evicts connections idle for longer than
    /// `idle_timeout`.
    pub heartbeat_interval: Duration,

    /// Close a connection that has produced no frame at all (including
    /// control frames) for this long.  `None` disables idle eviction.
    pub idle_timeout: Option<Duration>,

    /// Capacity of each connection's outbound queue.
    ///
    /// A peer whose queue fills up is considered stalled and is closed
    /// instead of back-pressuring the sender.
    pub queue_capacity: usize,

    /// Maximum time a single socket write may take before the connection is
    /// torn down.
    pub write_timeout: Duration,

    /// How long shutdown waits for connection tasks to finish after the
    /// close frames have been queued.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    /// | Field              | Default        |
    /// |--------------------|----------------|
    /// | bind_addr          | `0.0.0.0:3001` |
    /// | heartbeat_interval | 60 seconds     |
    /// | idle_timeout       | 120 seconds    |
    /// | queue_capacity     | 64             |
    /// | write_timeout      | 10 seconds     |
    /// | shutdown_grace     | 2 seconds      |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            heartbeat_interval: Duration::from_secs(60),
            idle_timeout: Some(Duration::from_secs(120)),
            queue_capacity: 64,
            write_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
