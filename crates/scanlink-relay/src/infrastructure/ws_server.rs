//! WebSocket server: listener lifecycle and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address and serving the
//!    [router](crate::infrastructure::routes) on it.
//! 2. Registering each upgraded connection with the [`PairingRelay`] and
//!    running two concurrent halves per connection:
//!    - **Reader**: pulls frames off the socket and hands text frames to the
//!      relay.
//!    - **Writer**: drains the connection's outbound queue onto the socket and
//!      sends the close frame when the relay asks for one.
//! 3. Running the heartbeat sweep on a fixed interval.
//! 4. Closing every connection with `1001` and draining the connection tasks
//!    when the `running` flag is cleared.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task.  No task ever writes to
//! another connection's socket: cross-connection traffic goes through the
//! target's bounded outbound queue, so a slow phone cannot stall the POS that
//! is sending to it.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use scanlink_core::{CloseReason, ConnectionPath};

use crate::application::{
    ConnectionHandle, ConnectionRegistry, HandleIo, HeartbeatMonitor, Outbound, PairingRelay,
};
use crate::domain::RelayConfig;
use crate::infrastructure::routes::{build_router, RelayState};

type WsSink = SplitSink<WebSocket, Message>;
type WsSource = SplitStream<WebSocket>;

/// How often the server checks the `running` flag.
const STOP_POLL: Duration = Duration::from_millis(200);

/// How long to wait for the peer's close reply after the relay sent a close
/// frame.
const CLOSE_LINGER: Duration = Duration::from_secs(2);

/// Lower bound for the heartbeat period; `tokio::time::interval` rejects zero.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;

    serve(listener, config, running).await
}

/// Runs the relay on an already-bound listener until `running` is cleared.
///
/// Tests bind `127.0.0.1:0` themselves and pass the listener in, so they can
/// read the ephemeral port before the server starts.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read or the
/// HTTP server fails.
pub async fn serve(
    listener: TcpListener,
    config: RelayConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to read relay listener address")?;
    info!("ScanLink relay listening on {local_addr}");

    let config = Arc::new(config);
    let relay = Arc::new(PairingRelay::new(Arc::new(ConnectionRegistry::new())));
    let heartbeat = spawn_heartbeat(Arc::clone(relay.registry()), &config);

    // Every connection task holds a clone of `drain_tx`; `recv` returns
    // `None` once the last one has finished.
    let (drain_tx, mut drain_rx) = mpsc::channel::<()>(1);
    let router = build_router(RelayState::new(
        Arc::clone(&relay),
        Arc::clone(&config),
        drain_tx,
    ));

    let stop_relay = Arc::clone(&relay);
    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_stop(&running).await;
        info!("shutdown flag set; no longer accepting connections");
        close_everyone(&stop_relay);
    })
    .await
    .context("relay server failed");

    heartbeat.abort();
    // Catches connections upgraded between the flag check and the listener
    // closing.
    close_everyone(&relay);

    if timeout(config.shutdown_grace, drain_rx.recv()).await.is_err() {
        warn!(
            "{} connections still open after {:?}; leaving them to the runtime",
            relay.registry().len(),
            config.shutdown_grace
        );
    }

    info!("relay on {local_addr} stopped");
    served
}

// ── Background tasks ──────────────────────────────────────────────────────────

async fn wait_for_stop(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        sleep(STOP_POLL).await;
    }
}

fn close_everyone(relay: &PairingRelay) {
    let closing = relay.registry().close_all(CloseReason::shutdown());
    if closing > 0 {
        info!("closing {closing} registered connections");
    }
}

/// Spawns the periodic heartbeat sweep.
fn spawn_heartbeat(registry: Arc<ConnectionRegistry>, config: &RelayConfig) -> JoinHandle<()> {
    let monitor = HeartbeatMonitor::new(registry, config.idle_timeout);
    let period = config.heartbeat_interval.max(MIN_HEARTBEAT);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first sweep
        // happens one full period after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            monitor.sweep(Instant::now());
        }
    })
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Runs one upgraded connection on `path` to completion and logs the outcome.
pub(crate) async fn run_connection(
    socket: WebSocket,
    path: ConnectionPath,
    peer_addr: SocketAddr,
    relay: &PairingRelay,
    config: &RelayConfig,
) {
    match run_session(socket, path, peer_addr, relay, config).await {
        Ok(()) => debug!("connection {peer_addr} finished"),
        Err(e) => warn!("connection {peer_addr} ended with error: {e:#}"),
    }
}

/// Registers the connection, pumps frames, and unregisters it.
///
/// # Errors
///
/// Returns an error if the socket fails mid-session.  The disconnect path
/// has already run by then.
async fn run_session(
    socket: WebSocket,
    path: ConnectionPath,
    peer_addr: SocketAddr,
    relay: &PairingRelay,
    config: &RelayConfig,
) -> anyhow::Result<()> {
    // ── Step 1: register and announce ─────────────────────────────────────────
    let (handle, io) = ConnectionHandle::new(path.session_id, path.role, config.queue_capacity);
    info!(
        "session={} role={}: connection {} from {peer_addr}",
        handle.session_id(),
        handle.role(),
        handle.id()
    );

    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_frames(ws_tx, io, config.write_timeout));
    relay.on_connect(Arc::clone(&handle));

    // ── Step 2: run until either half finishes ────────────────────────────────
    let reader = read_frames(ws_rx, &handle, relay);
    tokio::pin!(reader);

    let result = tokio::select! {
        read = &mut reader => {
            // The peer went away first; nothing left to write to.
            writer.abort();
            read
        }
        written = &mut writer => {
            // The relay closed the connection.  Give the peer a moment to
            // answer the close frame so the closing handshake completes.
            if let Ok(Ok(Some(reason))) = &written {
                debug!(
                    "session={} role={}: closed by relay: {reason}",
                    handle.session_id(),
                    handle.role()
                );
            }
            let _ = timeout(CLOSE_LINGER, &mut reader).await;
            match written {
                Ok(outcome) => outcome.map(|_| ()),
                Err(e) => Err(anyhow!("writer task failed: {e}")),
            }
        }
    };

    // ── Step 3: free the slot and notify the peer ────────────────────────────
    relay.on_disconnect(&handle);
    info!(
        "session={} role={}: connection {} closed after {}s",
        handle.session_id(),
        handle.role(),
        handle.id(),
        handle.age().as_secs()
    );
    result
}

/// Reads frames until the peer closes or the socket fails.
///
/// Every frame (including control frames) refreshes the handle's
/// `last_seen`.  A received Close frame is not the end of the stream:
/// reading continues so the close reply gets flushed.
async fn read_frames(
    mut ws_rx: WsSource,
    handle: &ConnectionHandle,
    relay: &PairingRelay,
) -> anyhow::Result<()> {
    while let Some(frame) = ws_rx.next().await {
        let frame = frame.context("WebSocket read failed")?;
        handle.touch();

        match frame {
            Message::Text(text) => {
                relay.on_message(handle, text.as_str());
            }
            Message::Binary(data) => {
                debug!(
                    "session={} role={}: ignoring {}-byte binary frame",
                    handle.session_id(),
                    handle.role(),
                    data.len()
                );
            }
            Message::Close(frame) => {
                debug!(
                    "session={} role={}: peer sent close {:?}",
                    handle.session_id(),
                    handle.role(),
                    frame
                );
            }
            // Pings are answered by the socket itself; any frame counts as
            // liveness and has already refreshed `last_seen`.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    Ok(())
}

/// Drains the outbound queue onto the socket.
///
/// Returns the close reason once a close frame has been sent, or `None` if
/// the handle was dropped without one.
async fn write_frames(
    mut ws_tx: WsSink,
    mut io: HandleIo,
    write_timeout: Duration,
) -> anyhow::Result<Option<CloseReason>> {
    loop {
        tokio::select! {
            // A close request wins over frames still waiting in the queue.
            biased;

            changed = io.close_rx.changed() => {
                if changed.is_err() {
                    return Ok(None);
                }
                let requested = io.close_rx.borrow_and_update().clone();
                if let Some(reason) = requested {
                    let close = Message::Close(Some(close_frame(&reason)));
                    send_with_timeout(&mut ws_tx, close, write_timeout).await?;
                    return Ok(Some(reason));
                }
            }

            item = io.outbound_rx.recv() => {
                let Some(item) = item else {
                    return Ok(None);
                };
                let message = match item {
                    Outbound::Text(text) => Message::Text(text.into()),
                    Outbound::Ping => Message::Ping(Bytes::new()),
                };
                send_with_timeout(&mut ws_tx, message, write_timeout).await?;
            }
        }
    }
}

async fn send_with_timeout(
    ws_tx: &mut WsSink,
    message: Message,
    limit: Duration,
) -> anyhow::Result<()> {
    timeout(limit, ws_tx.send(message))
        .await
        .map_err(|_| anyhow!("WebSocket write timed out after {limit:?}"))?
        .context("WebSocket write failed")
}

/// Closes a connection that never made it into the registry.
pub(crate) async fn reject(mut socket: WebSocket, reason: CloseReason) {
    if let Err(e) = socket.send(Message::Close(Some(close_frame(&reason)))).await {
        debug!("close frame not delivered: {e}");
        return;
    }
    // Wait briefly for the client's close reply.
    let _ = timeout(CLOSE_LINGER, async {
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;
}

fn close_frame(reason: &CloseReason) -> CloseFrame {
    CloseFrame {
        code: reason.code,
        reason: reason.reason.clone().into_owned().into(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use scanlink_core::{close_code, Role, SessionId};

    #[test]
    fn test_close_frame_carries_code_and_reason() {
        let frame = close_frame(&CloseReason::invalid_handshake());
        assert_eq!(frame.code, close_code::POLICY_VIOLATION);
        assert_eq!(frame.reason.as_str(), "Invalid connection type or sessionId");
    }

    #[test]
    fn test_close_frame_for_shutdown_is_going_away() {
        let frame = close_frame(&CloseReason::shutdown());
        assert_eq!(frame.code, close_code::GOING_AWAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_registered_connections_each_period() {
        // Arrange
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, mut io) =
            ConnectionHandle::new(SessionId::parse("HB").unwrap(), Role::Scanner, 8);
        registry.register(Arc::clone(&handle));
        let config = RelayConfig {
            heartbeat_interval: Duration::from_secs(60),
            idle_timeout: None,
            ..RelayConfig::default()
        };
        let heartbeat = spawn_heartbeat(registry, &config);

        // Act / Assert: nothing before the first full period
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(io.outbound_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(io.outbound_rx.try_recv(), Ok(Outbound::Ping));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(io.outbound_rx.try_recv(), Ok(Outbound::Ping));

        heartbeat.abort();
    }

    #[tokio::test]
    async fn test_serve_stops_when_flag_cleared() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let server = tokio::spawn(serve(
            listener,
            RelayConfig::default(),
            Arc::clone(&running),
        ));

        // Act
        running.store(false, Ordering::Relaxed);

        // Assert: the server notices within a few polls
        let result = timeout(Duration::from_secs(5), server).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_run_server_reports_bind_failure() {
        // Arrange: occupy a port
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = RelayConfig {
            bind_addr: taken.local_addr().unwrap(),
            ..RelayConfig::default()
        };

        // Act
        let result = run_server(config, Arc::new(AtomicBool::new(true))).await;

        // Assert
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to bind"));
    }
}
