//! TOML-based configuration for the peer client.
//!
//! Every field has a default, so a config file only needs the settings it
//! changes.  Example:
//!
//! ```toml
//! server_url = "ws://192.168.1.20:3001"
//! role = "scanner"
//! session_id = "ABC123"
//! ping_interval_secs = 30
//! dedup_window_ms = 2000
//!
//! [reconnect]
//! max_attempts = 5
//! max_delay_ms = 30000
//! ```
//!
//! Command-line flags are applied on top of the file in `main.rs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scanlink_core::{ConnectionPath, ProtocolError, Role, SessionId};

use crate::domain::reconnect::ReconnectPolicy;

/// Error type for loading or validating client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// No session ID was given in the file or on the command line.
    #[error("no session id configured")]
    MissingSessionId,

    /// The session ID is not a valid relay session ID.
    #[error(transparent)]
    InvalidSessionId(#[from] ProtocolError),

    /// The server URL does not use a WebSocket scheme.
    #[error("invalid server URL {0:?}: expected ws:// or wss://")]
    InvalidUrl(String),
}

/// All settings for one peer client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay base URL, without the `/{role}/{sessionId}` path.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Which side of the session this client plays.
    #[serde(default = "default_role")]
    pub role: Role,

    /// Session shared with the other peer (usually read from a QR code).
    #[serde(default)]
    pub session_id: Option<SessionId>,

    /// Seconds between application-level `ping` frames while open.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Identical barcodes within this many milliseconds are sent once.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_server_url() -> String {
    "ws://127.0.0.1:3001".to_string()
}
fn default_role() -> Role {
    Role::Scanner
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_dedup_window_ms() -> u64 {
    2_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            role: default_role(),
            session_id: None,
            ping_interval_secs: default_ping_interval_secs(),
            dedup_window_ms: default_dedup_window_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// The full WebSocket URL, `{server_url}/{role}/{sessionId}`.
    ///
    /// # Errors
    ///
    /// Fails if no session ID is set, the session ID is invalid, or the
    /// server URL is not a `ws://`/`wss://` URL.
    pub fn endpoint(&self) -> Result<String, ConfigError> {
        let raw = self
            .session_id
            .as_ref()
            .ok_or(ConfigError::MissingSessionId)?;
        // Deserialisation does not validate; re-check here.
        let session_id = SessionId::parse(raw.as_str())?;

        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(self.server_url.clone()));
        }

        let base = self.server_url.trim_end_matches('/');
        let path = ConnectionPath::new(self.role, session_id).to_path();
        Ok(format!("{base}{path}"))
    }
}

/// Loads a [`ClientConfig`] from a TOML file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
