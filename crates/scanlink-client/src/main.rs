//! ScanLink peer client entry point.
//!
//! Joins a relay session as either the scanner or the POS and bridges it to
//! the terminal:
//!
//! - **scanner**: every line typed on stdin is sent as a barcode (a USB
//!   scanner in keyboard mode works too);
//! - **pos**: received barcodes are printed to stdout, one per line, and
//!   lines typed on stdin are sent to the scanner as commands (JSON if the
//!   line parses as JSON, otherwise a string).
//!
//! Typing `/reconnect` retries after the reconnect budget is spent;
//! `/quit` or Ctrl+C closes the connection normally.
//!
//! # Usage
//!
//! ```text
//! scanlink-client [OPTIONS]
//!
//! Options:
//!   --config  <PATH>  TOML config file
//!   --url     <URL>   Relay base URL, e.g. ws://192.168.1.20:3001
//!   --role    <ROLE>  pos | scanner
//!   --session <ID>    Session ID shared with the other peer
//! ```
//!
//! Flags (or `SCANLINK_URL`, `SCANLINK_ROLE`, `SCANLINK_SESSION`) override
//! the config file, which overrides the built-in defaults.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scanlink_client::domain::{load_config, ClientConfig, ConnectionState};
use scanlink_client::infrastructure::{ClientError, ClientEvent, ClientHandle, SessionClient};
use scanlink_core::{PeerStatus, Role, SessionId};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// ScanLink peer client.
#[derive(Debug, Parser)]
#[command(
    name = "scanlink-client",
    about = "Join a ScanLink relay session as a barcode scanner or POS",
    version
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "SCANLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Relay base URL (`ws://` or `wss://`).
    #[arg(long, env = "SCANLINK_URL")]
    url: Option<String>,

    /// Which side of the session to play.
    #[arg(long, env = "SCANLINK_ROLE")]
    role: Option<Role>,

    /// Session ID shared with the other peer.
    #[arg(long, env = "SCANLINK_SESSION")]
    session: Option<SessionId>,
}

impl Cli {
    /// Loads the config file (if any) and applies the flags on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or no session ID
    /// is given anywhere.
    fn into_client_config(self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ClientConfig::default(),
        };

        if let Some(url) = self.url {
            config.server_url = url;
        }
        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(session) = self.session {
            config.session_id = Some(session);
        }

        if config.session_id.is_none() {
            bail!("no session id: pass --session or set session_id in the config file");
        }
        Ok(config)
    }
}

// ── Terminal bridge ───────────────────────────────────────────────────────────

/// A line typed by the user.
#[derive(Debug, PartialEq)]
enum InputLine {
    Reconnect,
    Quit,
    Payload(String),
}

fn parse_input(line: &str) -> Option<InputLine> {
    match line.trim() {
        "" => None,
        "/reconnect" => Some(InputLine::Reconnect),
        "/quit" => Some(InputLine::Quit),
        other => Some(InputLine::Payload(other.to_string())),
    }
}

/// POS commands are JSON when they parse as JSON, plain strings otherwise.
fn parse_command(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Reads stdin on a plain thread; a pending read must not hold up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("failed to read stdin: {e}");
                    break;
                }
            }
        }
    });
    rx
}

/// Forwards typed lines to the session until EOF or the runner stops.
async fn forward_input(
    handle: ClientHandle,
    mut lines: mpsc::Receiver<String>,
) -> Result<(), ClientError> {
    while let Some(line) = lines.recv().await {
        let Some(input) = parse_input(&line) else {
            continue;
        };
        match input {
            InputLine::Reconnect => handle.reconnect().await?,
            InputLine::Quit => {
                handle.close().await?;
                break;
            }
            InputLine::Payload(text) => match handle.role() {
                Role::Scanner => handle.send_barcode(text).await?,
                Role::Pos => handle.send_command(parse_command(&text)).await?,
            },
        }
    }
    Ok(())
}

/// Prints relayed payloads to stdout and logs everything else.
fn report(event: &ClientEvent) {
    match event {
        ClientEvent::Barcode { code, .. } => println!("{code}"),
        ClientEvent::Command { command } => println!("command: {command}"),
        ClientEvent::StateChanged(ConnectionState::Open) => info!("connected"),
        ClientEvent::StateChanged(state) => info!("connection {state}"),
        ClientEvent::Accepted { connection_id } => {
            info!(
                "relay accepted connection {}",
                connection_id.as_deref().unwrap_or("(unnamed)")
            );
        }
        ClientEvent::PeerStatus { peer, status } => match status {
            PeerStatus::Connected => info!("{peer} joined the session"),
            PeerStatus::Disconnected => warn!("{peer} left the session"),
        },
        ClientEvent::ReconnectScheduled {
            attempt,
            delay,
            close_code,
        } => {
            warn!(
                "connection lost (code {close_code}); reconnect attempt {attempt} in {:.1}s",
                delay.as_secs_f64()
            );
        }
        ClientEvent::Exhausted { attempts } => {
            error!(
                "could not reconnect after {attempts} attempts; type /reconnect to try again \
                 or /quit to exit"
            );
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Initialise `tracing_subscriber` (level from `RUST_LOG`, default `info`).
/// 2. Merge the config file and flags into a [`ClientConfig`].
/// 3. Start the session runner, the stdin bridge, and a Ctrl+C handler.
/// 4. Report events until the runner stops.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_client_config()?;
    let (client, handle, mut events) = SessionClient::new(&config)?;

    info!(
        "ScanLink client starting: role={}, url={}",
        config.role,
        client.url()
    );

    let runner = tokio::spawn(client.run());

    // ── Graceful shutdown ──────────────────────────────────────────────────────
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, closing connection");
                let _ = ctrl_c_handle.close().await;
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let input_handle = handle.clone();
    let lines = spawn_stdin_reader();
    tokio::spawn(async move {
        if let Err(e) = forward_input(input_handle, lines).await {
            warn!("stdin bridge stopped: {e}");
        }
    });

    while let Some(event) = events.recv().await {
        report(&event);
    }

    // `handle` stays alive until here so stdin EOF alone does not close a
    // POS session.
    drop(handle);
    runner.await.context("session task panicked")??;

    info!("ScanLink client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
