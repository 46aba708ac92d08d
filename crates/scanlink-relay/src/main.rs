//! ScanLink pairing relay entry point.
//!
//! This binary accepts WebSocket connections from two kinds of peers, a
//! desktop point-of-sale (POS) page and a phone acting as a barcode scanner,
//! and pairs them by session ID.  Scans flow from the phone to the POS and
//! commands flow back.
//!
//! # Usage
//!
//! ```text
//! scanlink-relay [OPTIONS]
//!
//! Options:
//!   --port              <PORT>  Listener port [default: 3001]
//!   --bind              <ADDR>  Listener IP address [default: 0.0.0.0]
//!   --heartbeat-secs    <SECS>  Heartbeat sweep interval [default: 60]
//!   --idle-timeout-secs <SECS>  Close connections silent this long, 0 = never [default: 120]
//!   --queue-capacity    <N>     Per-connection outbound queue size [default: 64]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable                     | Default   | Description                      |
//! |------------------------------|-----------|----------------------------------|
//! | `SCANLINK_PORT`              | `3001`    | Listener port                    |
//! | `SCANLINK_BIND`              | `0.0.0.0` | Listener IP address              |
//! | `SCANLINK_HEARTBEAT_SECS`    | `60`      | Heartbeat sweep interval (secs)  |
//! | `SCANLINK_IDLE_TIMEOUT_SECS` | `120`     | Idle eviction (secs, 0 disables) |
//! | `SCANLINK_QUEUE_CAPACITY`    | `64`      | Outbound queue size per peer     |
//!
//! # Architecture overview
//!
//! ```text
//! Phone scanner            Desktop POS
//!   ws://host/scanner/ID     ws://host/pos/ID
//!         ↘                 ↙
//!        scanlink-relay  ← this process
//!          domain/          RelayConfig
//!          application/     registry, pairing relay, heartbeat
//!          infrastructure/  router, health check, socket I/O
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scanlink_relay::domain::{RelayConfig, DEFAULT_PORT};
use scanlink_relay::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// ScanLink pairing relay.
///
/// Pairs a phone barcode scanner with a desktop POS session over WebSocket.
#[derive(Debug, Parser)]
#[command(
    name = "scanlink-relay",
    about = "WebSocket relay pairing phone barcode scanners with POS sessions",
    version
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SCANLINK_PORT")]
    port: u16,

    /// IP address to bind to.
    ///
    /// `0.0.0.0` accepts phones on the LAN; `127.0.0.1` only local peers.
    #[arg(long, default_value = "0.0.0.0", env = "SCANLINK_BIND")]
    bind: String,

    /// Seconds between heartbeat sweeps.
    #[arg(
        long,
        default_value_t = 60,
        env = "SCANLINK_HEARTBEAT_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    heartbeat_secs: u64,

    /// Close a connection after this many seconds without any frame.
    ///
    /// `0` disables idle eviction.
    #[arg(long, default_value_t = 120, env = "SCANLINK_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: u64,

    /// Outbound frames buffered per connection before it counts as stalled.
    #[arg(
        long,
        default_value_t = 64,
        env = "SCANLINK_QUEUE_CAPACITY",
        value_parser = clap::value_parser!(u64).range(1..=65_536)
    )]
    queue_capacity: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: '{}'", self.bind))?;

        let idle_timeout = match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(RelayConfig {
            bind_addr: SocketAddr::new(ip, self.port),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            idle_timeout,
            queue_capacity: usize::try_from(self.queue_capacity)
                .context("queue capacity does not fit in usize")?,
            ..RelayConfig::default()
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Initialise `tracing_subscriber` (level from `RUST_LOG`, default `info`).
/// 2. Parse CLI arguments into a [`RelayConfig`].
/// 3. Spawn a Ctrl+C handler that clears the shared `running` flag.
/// 4. Run the server until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config()?;

    info!(
        "ScanLink relay starting: bind={}, heartbeat={:?}, idle_timeout={:?}, queue={}",
        config.bind_addr, config.heartbeat_interval, config.idle_timeout, config.queue_capacity
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("ScanLink relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
