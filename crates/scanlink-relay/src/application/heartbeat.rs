//! Heartbeat monitor: periodic liveness sweep over the registry.
//!
//! The monitor is mostly a diagnostic.  Liveness is primarily reactive:
//! peers send their own `ping`/`heartbeat` frames and transport failures end
//! a connection on their own.  On top of that, each sweep
//!
//! 1. logs how many connections, sessions, and pairs are live,
//! 2. queues a protocol-level Ping on every connection so that NAT boxes and
//!    proxies see traffic, and
//! 3. closes connections that have produced no frame for `idle_timeout`.
//!
//! Evicted connections are not removed here.  Their writer sends the close
//! frame, the connection task ends, and the normal disconnect path frees the
//! slot and notifies the peer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use scanlink_core::{CloseReason, Role, SessionId};

use crate::application::registry::ConnectionRegistry;

/// Counts produced by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub connections: usize,
    pub sessions: usize,
    pub pos: usize,
    pub scanners: usize,
    /// Sessions with both roles online.
    pub paired: usize,
    /// Sessions with exactly one role online.
    pub unpaired: usize,
    /// Connections that accepted a protocol-level Ping.
    pub pinged: usize,
    /// Connections closed for being idle.
    pub evicted: usize,
}

/// Sweeps a registry for idle connections and logs a snapshot.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Option<Duration>,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, idle_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            idle_timeout,
        }
    }

    /// Runs one sweep as of `now`.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let snapshot = self.registry.snapshot();
        let mut report = SweepReport {
            connections: snapshot.handles.len(),
            ..SweepReport::default()
        };

        let mut sessions: HashMap<&SessionId, usize> = HashMap::new();
        for handle in &snapshot.handles {
            match handle.role() {
                Role::Pos => report.pos += 1,
                Role::Scanner => report.scanners += 1,
            }
            *sessions.entry(handle.session_id()).or_default() += 1;

            if handle.is_closing() {
                continue;
            }

            let idle = handle.idle_for(now);
            if self.idle_timeout.is_some_and(|limit| idle > limit) {
                warn!(
                    "session={} role={}: no frames for {}s, closing",
                    handle.session_id(),
                    handle.role(),
                    idle.as_secs()
                );
                handle.close(CloseReason::idle_timeout());
                report.evicted += 1;
            } else if handle.send_ping().is_ok() {
                report.pinged += 1;
            }
        }

        report.sessions = sessions.len();
        report.paired = sessions.values().filter(|&&n| n >= 2).count();
        report.unpaired = report.sessions - report.paired;

        info!(
            "heartbeat: {} connections in {} sessions (pos={}, scanner={}, paired={}, unpaired={}, evicted={})",
            report.connections,
            report.sessions,
            report.pos,
            report.scanners,
            report.paired,
            report.unpaired,
            report.evicted
        );
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::{ConnectionHandle, HandleIo, Outbound};

    fn add(registry: &ConnectionRegistry, session: &str, role: Role) -> (Arc<ConnectionHandle>, HandleIo) {
        let (h, io) = ConnectionHandle::new(SessionId::parse(session).unwrap(), role, 8);
        registry.register(Arc::clone(&h));
        (h, io)
    }

    #[test]
    fn test_sweep_on_empty_registry_reports_zeroes() {
        let monitor = HeartbeatMonitor::new(Arc::new(ConnectionRegistry::new()), None);
        assert_eq!(monitor.sweep(Instant::now()), SweepReport::default());
    }

    #[test]
    fn test_sweep_counts_roles_and_pairs() {
        // Arrange: one paired session, one lone scanner
        let registry = Arc::new(ConnectionRegistry::new());
        let _a = add(&registry, "A", Role::Pos);
        let _b = add(&registry, "A", Role::Scanner);
        let _c = add(&registry, "B", Role::Scanner);
        let monitor = HeartbeatMonitor::new(Arc::clone(&registry), None);

        // Act
        let report = monitor.sweep(Instant::now());

        // Assert
        assert_eq!(report.connections, 3);
        assert_eq!(report.sessions, 2);
        assert_eq!(report.pos, 1);
        assert_eq!(report.scanners, 2);
        assert_eq!(report.paired, 1);
        assert_eq!(report.unpaired, 1);
        assert_eq!(report.pinged, 3);
        assert_eq!(report.evicted, 0);
    }

    #[test]
    fn test_sweep_queues_protocol_ping() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_h, mut io) = add(&registry, "A", Role::Pos);
        let monitor = HeartbeatMonitor::new(registry, None);

        monitor.sweep(Instant::now());

        assert_eq!(io.outbound_rx.try_recv().unwrap(), Outbound::Ping);
    }

    #[test]
    fn test_sweep_evicts_connection_idle_past_timeout() {
        // Arrange
        let registry = Arc::new(ConnectionRegistry::new());
        let (h, _io) = add(&registry, "A", Role::Pos);
        let monitor = HeartbeatMonitor::new(Arc::clone(&registry), Some(Duration::from_secs(90)));

        // Act: sweep as if 100s passed without a frame
        let report = monitor.sweep(h.last_seen() + Duration::from_secs(100));

        // Assert
        assert_eq!(report.evicted, 1);
        assert_eq!(report.pinged, 0);
        assert_eq!(h.close_reason(), Some(CloseReason::idle_timeout()));
    }

    #[test]
    fn test_sweep_keeps_connection_within_timeout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (h, _io) = add(&registry, "A", Role::Scanner);
        let monitor = HeartbeatMonitor::new(Arc::clone(&registry), Some(Duration::from_secs(90)));

        let report = monitor.sweep(h.last_seen() + Duration::from_secs(30));

        assert_eq!(report.evicted, 0);
        assert_eq!(report.pinged, 1);
        assert!(!h.is_closing());
    }

    #[test]
    fn test_sweep_without_idle_timeout_never_evicts() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (h, _io) = add(&registry, "A", Role::Pos);
        let monitor = HeartbeatMonitor::new(registry, None);

        let report = monitor.sweep(Instant::now() + Duration::from_secs(86_400));

        assert_eq!(report.evicted, 0);
        assert!(!h.is_closing());
    }

    #[test]
    fn test_sweep_skips_connections_already_closing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (h, mut io) = add(&registry, "A", Role::Pos);
        h.close(CloseReason::shutdown());
        let monitor = HeartbeatMonitor::new(registry, Some(Duration::from_secs(1)));

        let report = monitor.sweep(Instant::now() + Duration::from_secs(10));

        assert_eq!(report.evicted, 0);
        assert_eq!(report.pinged, 0);
        assert!(io.outbound_rx.try_recv().is_err());
        assert_eq!(h.close_reason(), Some(CloseReason::shutdown()));
    }
}
