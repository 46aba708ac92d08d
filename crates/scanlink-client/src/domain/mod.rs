//! Domain layer for scanlink-client.
//!
//! Plain data: what the client is configured to do and which state its
//! connection is in.  Nothing here performs I/O except reading the config
//! file on request.

pub mod config;
pub mod reconnect;
pub mod state;

pub use config::{load_config, ClientConfig, ConfigError};
pub use reconnect::ReconnectPolicy;
pub use state::ConnectionState;
