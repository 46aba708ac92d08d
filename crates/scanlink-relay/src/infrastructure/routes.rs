//! HTTP surface of the relay.
//!
//! One port serves both kinds of traffic:
//!
//! ```text
//! GET /{role}/{sessionId}, Upgrade: websocket  → peer session
//! any other WebSocket upgrade                  → upgrade, then close 1008
//! any request without an upgrade               → 200 "scanlink relay is running"
//! ```
//!
//! Load balancers and uptime checks hit the same port as the phones, so a
//! plain request on any path, including a session path, answers the
//! liveness string.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use scanlink_core::{CloseReason, ConnectionPath, ProtocolError, Role, SessionId};

use crate::application::PairingRelay;
use crate::domain::RelayConfig;
use crate::infrastructure::ws_server::{reject, run_connection};

/// Body of every non-WebSocket response.
pub const HEALTH_BODY: &str = "scanlink relay is running";

type Upgrade = Result<WebSocketUpgrade, WebSocketUpgradeRejection>;

/// Shared state handed to every request.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub relay: Arc<PairingRelay>,
    pub config: Arc<RelayConfig>,
    /// Held by every live connection; shutdown waits for all clones to drop.
    drain: mpsc::Sender<()>,
}

impl RelayState {
    pub fn new(relay: Arc<PairingRelay>, config: Arc<RelayConfig>, drain: mpsc::Sender<()>) -> Self {
        Self {
            relay,
            config,
            drain,
        }
    }
}

/// Builds the relay's router.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// session handler logs the peer address.
pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/{role}/{session}", any(session_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

async fn session_handler(
    upgrade: Upgrade,
    Path((role, session)): Path<(String, String)>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<RelayState>,
) -> Response {
    let Ok(ws) = upgrade else {
        debug!("health check from {peer_addr} on /{role}/{session}");
        return HEALTH_BODY.into_response();
    };

    match parse_slot(&role, &session) {
        Ok(path) => ws.on_upgrade(move |socket| async move {
            let RelayState {
                relay,
                config,
                drain,
            } = state;
            run_connection(socket, path, peer_addr, &relay, &config).await;
            drop(drain);
        }),
        Err(e) => {
            warn!("rejecting {peer_addr} on /{role}/{session}: {e}");
            ws.on_upgrade(|socket| reject(socket, CloseReason::invalid_handshake()))
        }
    }
}

/// Anything that is not `/{role}/{session}`.
async fn fallback_handler(upgrade: Upgrade, uri: Uri) -> Response {
    match upgrade {
        Ok(ws) => {
            warn!("rejecting WebSocket upgrade on '{}'", uri.path());
            ws.on_upgrade(|socket| reject(socket, CloseReason::invalid_handshake()))
        }
        Err(_) => {
            debug!("health check on {}", uri.path());
            HEALTH_BODY.into_response()
        }
    }
}

/// Validates the two path segments captured by the session route.
fn parse_slot(role: &str, session: &str) -> Result<ConnectionPath, ProtocolError> {
    let role: Role = role.parse()?;
    Ok(ConnectionPath::new(role, SessionId::parse(session)?))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
