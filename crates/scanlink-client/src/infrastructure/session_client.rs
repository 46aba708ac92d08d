//! WebSocket session runner for one peer.
//!
//! [`SessionClient::run`] owns the socket and the reconnect loop.  The
//! application talks to it through two channels:
//!
//! - a [`ClientHandle`] to send barcodes or commands, close, or retry after
//!   the reconnect budget is spent;
//! - a receiver of [`ClientEvent`]s describing state changes, peer presence,
//!   and relayed payloads.
//!
//! ```text
//!  ClientHandle ──requests──▶ SessionClient::run ◀──frames──▶ relay
//!  app          ◀──events────┘
//! ```
//!
//! While open, the runner sends an application-level `ping` on a fixed
//! interval so proxies and NAT boxes keep the socket alive.  The relay
//! answers with `pong`, which is consumed here.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use scanlink_core::{
    close_code, decode_frame, encode_frame, iso_timestamp, PeerStatus, ProtocolError,
    RelayMessage, Role,
};

use crate::application::{BarcodeDeduplicator, CloseDecision, ReconnectMachine, CONNECT_FAILED};
use crate::domain::{ClientConfig, ConfigError, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

const EVENT_CAPACITY: usize = 64;
const REQUEST_CAPACITY: usize = 64;

/// Longest a single WebSocket handshake may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the relay's reply after sending a close frame.
const CLOSE_LINGER: Duration = Duration::from_secs(2);

/// Lower bound for the ping period; `tokio::time::interval` rejects zero.
const MIN_PING: Duration = Duration::from_millis(10);

/// RFC 6455 "no status received": a close frame without a code.
const NO_STATUS: u16 = 1005;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised by the session runner and its handle.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket handshake failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },

    /// The handshake did not finish within the connect timeout.
    #[error("timed out connecting to {url}")]
    ConnectTimeout { url: String },

    /// The open socket failed.
    #[error("WebSocket error: {0}")]
    Socket(#[from] WsError),

    /// An outbound frame could not be encoded.
    #[error(transparent)]
    Encode(#[from] ProtocolError),

    /// The reconnect budget was spent and nobody asked to retry.
    #[error("gave up after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },

    /// The payload is not one this role may send.
    #[error("a {role} client cannot send {kind} frames")]
    WrongRole { role: Role, kind: &'static str },

    /// The runner has exited.
    #[error("session client has stopped")]
    Stopped,

    /// The configuration does not describe a usable endpoint.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ── Events and requests ───────────────────────────────────────────────────────

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The connection moved to a new lifecycle state.
    StateChanged(ConnectionState),
    /// The relay acknowledged the connection.
    Accepted { connection_id: Option<String> },
    /// The other role in the session connected or disconnected.
    PeerStatus { peer: Role, status: PeerStatus },
    /// A barcode relayed from the scanner (POS clients only).  A code sent
    /// as a JSON number or other non-string value arrives as its JSON text.
    Barcode {
        code: String,
        device_info: Option<Value>,
    },
    /// A command relayed from the POS (scanner clients only).
    Command { command: Value },
    /// The socket closed abnormally; another attempt follows after `delay`.
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
        close_code: u16,
    },
    /// The reconnect budget is spent.  Call [`ClientHandle::reconnect`] to
    /// try again.
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
enum ClientRequest {
    Barcode(String),
    Command(Value),
    Close,
    Reconnect,
}

/// Cloneable handle for talking to a running [`SessionClient`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    role: Role,
    requests: mpsc::Sender<ClientRequest>,
}

impl ClientHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Queues a scanned barcode.  Repeats within the de-duplication window
    /// are dropped by the runner.
    ///
    /// # Errors
    ///
    /// [`ClientError::WrongRole`] for a POS client, [`ClientError::Stopped`]
    /// if the runner has exited.
    pub async fn send_barcode(&self, code: impl Into<String>) -> Result<(), ClientError> {
        self.require_role(Role::Scanner, "barcode")?;
        self.request(ClientRequest::Barcode(code.into())).await
    }

    /// Queues a command for the scanner.
    ///
    /// # Errors
    ///
    /// [`ClientError::WrongRole`] for a scanner client,
    /// [`ClientError::Stopped`] if the runner has exited.
    pub async fn send_command(&self, command: Value) -> Result<(), ClientError> {
        self.require_role(Role::Pos, "command")?;
        self.request(ClientRequest::Command(command)).await
    }

    /// Closes the connection normally.  No reconnect follows.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.request(ClientRequest::Close).await
    }

    /// Retries now with a fresh attempt budget.  Meant for use after
    /// [`ClientEvent::Exhausted`]; also cuts a pending backoff short.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.request(ClientRequest::Reconnect).await
    }

    fn require_role(&self, role: Role, kind: &'static str) -> Result<(), ClientError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ClientError::WrongRole {
                role: self.role,
                kind,
            })
        }
    }

    async fn request(&self, request: ClientRequest) -> Result<(), ClientError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ClientError::Stopped)
    }
}

// ── Runner ────────────────────────────────────────────────────────────────────

/// Outcome of waiting while not connected.
enum Wait {
    Elapsed,
    Reconnect,
    Close,
    HandleDropped,
}

/// Drives one peer connection, reconnecting as the policy allows.
pub struct SessionClient {
    url: String,
    role: Role,
    ping_interval: Duration,
    machine: ReconnectMachine,
    dedup: BarcodeDeduplicator,
    events: mpsc::Sender<ClientEvent>,
    requests: mpsc::Receiver<ClientRequest>,
}

impl SessionClient {
    /// Builds a runner plus its handle and event stream.  Nothing connects
    /// until [`run`](Self::run) is awaited.
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] if the configuration has no usable endpoint.
    pub fn new(
        config: &ClientConfig,
    ) -> Result<(Self, ClientHandle, mpsc::Receiver<ClientEvent>), ClientError> {
        let url = config.endpoint()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CAPACITY);

        let client = Self {
            url,
            role: config.role,
            ping_interval: config.ping_interval(),
            machine: ReconnectMachine::new(config.reconnect.clone()),
            dedup: BarcodeDeduplicator::new(config.dedup_window()),
            events: events_tx,
            requests: requests_rx,
        };
        let handle = ClientHandle {
            role: config.role,
            requests: requests_tx,
        };
        Ok((client, handle, events_rx))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs until the connection is closed normally, closed through the
    /// handle, or every handle is dropped.
    ///
    /// # Errors
    ///
    /// [`ClientError::Exhausted`] if the reconnect budget ran out and every
    /// handle was dropped instead of asking to retry.
    pub async fn run(mut self) -> Result<(), ClientError> {
        loop {
            let state = self.machine.on_connecting();
            self.set_state(state).await;

            let code = self.connect_once().await;

            match self.machine.on_closed(code) {
                CloseDecision::Stop => {
                    info!("connection to {} closed ({code}); not reconnecting", self.url);
                    self.set_state(ConnectionState::Closed).await;
                    return Ok(());
                }
                CloseDecision::Reconnect { attempt, delay } => {
                    warn!(
                        "connection to {} lost ({code}); attempt {attempt} in {:.1}s",
                        self.url,
                        delay.as_secs_f64()
                    );
                    self.emit(ClientEvent::ReconnectScheduled {
                        attempt,
                        delay,
                        close_code: code,
                    })
                    .await;
                    self.set_state(self.machine.state()).await;

                    match self.wait(Some(delay)).await {
                        Wait::Elapsed | Wait::Reconnect => {}
                        Wait::Close | Wait::HandleDropped => {
                            self.set_state(ConnectionState::Closed).await;
                            return Ok(());
                        }
                    }
                }
                CloseDecision::Exhausted { attempts } => {
                    error!(
                        "could not reach {} after {attempts} attempts; reconnect manually",
                        self.url
                    );
                    self.set_state(ConnectionState::Closed).await;
                    self.emit(ClientEvent::Exhausted { attempts }).await;

                    match self.wait(None).await {
                        Wait::Reconnect | Wait::Elapsed => {}
                        Wait::Close => return Ok(()),
                        Wait::HandleDropped => return Err(ClientError::Exhausted { attempts }),
                    }
                }
            }
        }
    }

    /// One connect attempt.  Returns the close code that ended it.
    async fn connect_once(&mut self) -> u16 {
        let ws = match timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(source)) => {
                let err = ClientError::Connect {
                    url: self.url.clone(),
                    source,
                };
                warn!("{err}");
                return CONNECT_FAILED;
            }
            Err(_) => {
                warn!(
                    "{}",
                    ClientError::ConnectTimeout {
                        url: self.url.clone()
                    }
                );
                return CONNECT_FAILED;
            }
        };

        info!("connected to {} as {}", self.url, self.role);
        let state = self.machine.on_open();
        self.set_state(state).await;
        self.dedup.reset();

        self.run_open(ws).await
    }

    /// Pumps frames while the socket is open.  Returns the close code.
    async fn run_open(&mut self, ws: WsStream) -> u16 {
        let (mut ws_tx, mut ws_rx) = ws.split();

        let mut ticker = interval(self.ping_interval.max(MIN_PING));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        // Code from the relay's close frame, if it sent one.
        let mut peer_code: Option<u16> = None;

        loop {
            tokio::select! {
                frame = ws_rx.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.on_text(&text).await,
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map_or(NO_STATUS, |f| u16::from(f.code));
                        info!(
                            "relay closed the connection: {} ({code})",
                            frame.as_ref().map_or("", |f| f.reason.as_ref())
                        );
                        peer_code = Some(code);
                        // Keep reading so the close reply is flushed.
                    }
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed)) | None => break,
                    Some(Err(e)) => {
                        warn!("{}", ClientError::Socket(e));
                        break;
                    }
                },

                _ = ticker.tick() => {
                    let ping = RelayMessage::Ping {
                        timestamp: Some(Value::from(iso_timestamp())),
                    };
                    if let Err(e) = send_message(&mut ws_tx, &ping).await {
                        warn!("ping failed: {e}");
                        break;
                    }
                }

                request = self.requests.recv() => match request {
                    Some(ClientRequest::Close) | None => {
                        let state = self.machine.request_close();
                        self.set_state(state).await;
                        close_gracefully(&mut ws_tx, &mut ws_rx).await;
                        return close_code::NORMAL;
                    }
                    Some(ClientRequest::Barcode(code)) => {
                        if !self.dedup.should_send(&code) {
                            debug!("suppressed repeat scan");
                            continue;
                        }
                        let message = RelayMessage::Barcode {
                            code: Value::String(code),
                            timestamp: Some(Value::from(iso_timestamp())),
                            device_info: None,
                        };
                        if let Err(e) = send_message(&mut ws_tx, &message).await {
                            warn!("barcode not sent: {e}");
                            break;
                        }
                    }
                    Some(ClientRequest::Command(command)) => {
                        let message = RelayMessage::Command {
                            command,
                            timestamp: Some(Value::from(iso_timestamp())),
                        };
                        if let Err(e) = send_message(&mut ws_tx, &message).await {
                            warn!("command not sent: {e}");
                            break;
                        }
                    }
                    Some(ClientRequest::Reconnect) => {
                        debug!("already connected; ignoring reconnect request");
                    }
                },
            }
        }

        peer_code.unwrap_or(close_code::ABNORMAL)
    }

    /// Turns one inbound text frame into an event.
    async fn on_text(&mut self, text: &str) {
        let message = match decode_frame(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("ignoring frame from relay: {e}");
                return;
            }
        };

        let event = match message {
            RelayMessage::Connection { connection_id, .. } => {
                ClientEvent::Accepted { connection_id }
            }
            RelayMessage::PosStatus { status, .. } => ClientEvent::PeerStatus {
                peer: Role::Pos,
                status,
            },
            RelayMessage::ScannerStatus { status, .. } => ClientEvent::PeerStatus {
                peer: Role::Scanner,
                status,
            },
            RelayMessage::Barcode {
                code, device_info, ..
            } => ClientEvent::Barcode {
                code: code_text(code),
                device_info,
            },
            RelayMessage::Command { command, .. } => ClientEvent::Command { command },
            other => {
                debug!("consumed {} frame", other.kind_name());
                return;
            }
        };
        self.emit(event).await;
    }

    /// Waits for `delay` (or forever when `None`) while serving requests.
    async fn wait(&mut self, delay: Option<Duration>) -> Wait {
        let timer = async {
            match delay {
                Some(delay) => sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => return Wait::Elapsed,
                request = self.requests.recv() => match request {
                    Some(ClientRequest::Reconnect) => {
                        info!("manual reconnect requested");
                        self.machine.manual_reconnect();
                        return Wait::Reconnect;
                    }
                    Some(ClientRequest::Close) => {
                        self.machine.request_close();
                        return Wait::Close;
                    }
                    Some(ClientRequest::Barcode(_) | ClientRequest::Command(_)) => {
                        debug!("not connected; dropping outbound frame");
                    }
                    None => return Wait::HandleDropped,
                },
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        debug!("state: {state}");
        self.emit(ClientEvent::StateChanged(state)).await;
    }

    async fn emit(&self, event: ClientEvent) {
        // A dropped receiver just means nobody is listening.
        let _ = self.events.send(event).await;
    }
}

async fn send_message(ws_tx: &mut WsSink, message: &RelayMessage) -> Result<(), ClientError> {
    let text = encode_frame(message)?;
    ws_tx.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Sends a normal close and waits briefly for the relay's reply.
async fn close_gracefully(ws_tx: &mut WsSink, ws_rx: &mut WsSource) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "Client closed".into(),
    };
    if let Err(e) = ws_tx.send(WsMessage::Close(Some(frame))).await {
        debug!("close frame not delivered: {e}");
        return;
    }
    let _ = timeout(CLOSE_LINGER, async {
        while let Some(Ok(_)) = ws_rx.next().await {}
    })
    .await;
}

/// Display form of a relayed code.
fn code_text(code: Value) -> String {
    match code {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
