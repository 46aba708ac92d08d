//! End-to-end tests for the pairing relay.
//!
//! # Purpose
//!
//! Each test starts a real relay on an ephemeral `127.0.0.1` port and talks
//! to it with real WebSocket clients, exactly as a phone and a POS page
//! would.  They verify:
//!
//! - Pairing: the connection ack, and the `*_status` frames each side gets
//!   when its peer arrives or leaves.
//! - Relaying: barcodes reach the POS and commands reach the scanner,
//!   byte-for-byte, and never cross sessions.
//! - Liveness: `ping` is answered locally and unknown types are ignored.
//! - Edge cases: a second scanner supersedes the first, a burst of scanners
//!   on one slot leaves exactly one open, a bad path is closed with `1008`,
//!   plain HTTP gets the health response, and shutdown closes everyone with
//!   `1001`.
//!
//! ```text
//! scanner ──ws://.../scanner/S1──┐
//!                                ├── relay (this crate)
//! pos     ──ws://.../pos/S1──────┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use scanlink_relay::domain::RelayConfig;
use scanlink_relay::infrastructure::serve;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(250);

// ── Harness ───────────────────────────────────────────────────────────────────

struct Relay {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Relay {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let running = Arc::new(AtomicBool::new(true));
        let config = RelayConfig {
            bind_addr: addr,
            ..RelayConfig::default()
        };
        let task = tokio::spawn(serve(listener, config, Arc::clone(&running)));
        Self {
            addr,
            running,
            task,
        }
    }

    async fn connect(&self, path: &str) -> Client {
        let url = format!("ws://{}{}", self.addr, path);
        let (ws, _response) = connect_async(url.as_str()).await.expect("connect");
        ws
    }

    /// Connects and consumes the `connection` ack.
    async fn join(&self, path: &str) -> Client {
        let mut ws = self.connect(path).await;
        let ack = next_json(&mut ws).await;
        assert_eq!(ack["type"], "connection", "first frame must be the ack");
        ws
    }

    async fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = timeout(WAIT, self.task).await;
    }
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut Client) -> Value {
    serde_json::from_str(&next_text(ws).await).expect("relay sends JSON")
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let frame = timeout(WAIT, ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame ok");
        match frame {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Reads until a close frame arrives and returns it.
async fn next_close(ws: &mut Client) -> Option<CloseFrame<'static>> {
    loop {
        match timeout(WAIT, ws.next()).await.expect("close within timeout") {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("socket error before close frame: {e}"),
            None => return None,
        }
    }
}

/// Reads until a close frame (returning its code) or until nothing arrives
/// for [`QUIET`] (returning `None`).
async fn close_code_or_quiet(ws: &mut Client) -> Option<u16> {
    loop {
        match timeout(QUIET, ws.next()).await {
            Err(_) => return None,
            Ok(Some(Ok(Message::Close(frame)))) => {
                return Some(frame.map_or(1005, |f| u16::from(f.code)));
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => panic!("socket error before close frame: {e}"),
            Ok(None) => panic!("stream ended without a close frame"),
        }
    }
}

/// Asserts that no text frame arrives for a short while.
async fn assert_quiet(ws: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, ws.next()).await {
        panic!("expected no frame, got {text}");
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.expect("send");
}

// ── Pairing ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lone_scanner_gets_only_the_ack() {
    // Arrange
    let relay = Relay::start().await;

    // Act
    let mut scanner = relay.connect("/scanner/S1").await;
    let ack = next_json(&mut scanner).await;

    // Assert
    assert_eq!(ack["type"], "connection");
    assert_eq!(ack["status"], "connected");
    assert_eq!(ack["sessionId"], "S1");
    assert_eq!(ack["role"], "scanner");
    assert!(ack["timestamp"].is_string());
    assert_quiet(&mut scanner).await;

    relay.stop().await;
}

#[tokio::test]
async fn test_second_peer_triggers_status_on_both_sides() {
    let relay = Relay::start().await;
    let mut scanner = relay.join("/scanner/S1").await;

    // Act: the POS arrives
    let mut pos = relay.connect("/pos/S1").await;

    // Assert: POS sees ack then the scanner's status; scanner sees the POS
    let ack = next_json(&mut pos).await;
    assert_eq!(ack["type"], "connection");
    assert_eq!(ack["role"], "pos");

    let to_pos = next_json(&mut pos).await;
    assert_eq!(to_pos["type"], "scanner_status");
    assert_eq!(to_pos["status"], "connected");
    assert_eq!(to_pos["sessionId"], "S1");

    let to_scanner = next_json(&mut scanner).await;
    assert_eq!(to_scanner["type"], "pos_status");
    assert_eq!(to_scanner["status"], "connected");

    relay.stop().await;
}

#[tokio::test]
async fn test_disconnect_notifies_surviving_peer() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;
    let mut scanner = relay.join("/scanner/S1").await;
    let _ = next_json(&mut scanner).await; // pos_status connected
    let _ = next_json(&mut pos).await; // scanner_status connected

    // Act
    scanner.close(None).await.expect("close");

    // Assert
    let notice = next_json(&mut pos).await;
    assert_eq!(notice["type"], "scanner_status");
    assert_eq!(notice["status"], "disconnected");
    assert_eq!(notice["sessionId"], "S1");

    relay.stop().await;
}

// ── Relaying ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_barcode_is_forwarded_verbatim_to_pos() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;
    let mut scanner = relay.join("/scanner/S1").await;
    let _ = next_json(&mut pos).await;
    let _ = next_json(&mut scanner).await;

    // Act: field order and extra fields must survive
    let raw = r#"{"type":"barcode","code":"4006381333931","timestamp":1700000000000,"deviceInfo":{"model":"Pixel"},"extra":true}"#;
    scanner.send(Message::Text(raw.to_string())).await.unwrap();

    // Assert
    assert_eq!(next_text(&mut pos).await, raw);

    relay.stop().await;
}

#[tokio::test]
async fn test_numeric_barcode_code_is_forwarded() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;
    let mut scanner = relay.join("/scanner/S1").await;
    let _ = next_json(&mut pos).await;
    let _ = next_json(&mut scanner).await;

    let raw = r#"{"type":"barcode","code":4006381333931,"timestamp":1}"#;
    scanner.send(Message::Text(raw.to_string())).await.unwrap();

    assert_eq!(next_text(&mut pos).await, raw);

    relay.stop().await;
}

#[tokio::test]
async fn test_command_is_forwarded_to_scanner() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;
    let mut scanner = relay.join("/scanner/S1").await;
    let _ = next_json(&mut pos).await;
    let _ = next_json(&mut scanner).await;

    send_json(&mut pos, json!({"type": "command", "command": "pause"})).await;

    let received = next_json(&mut scanner).await;
    assert_eq!(received["type"], "command");
    assert_eq!(received["command"], "pause");

    relay.stop().await;
}

#[tokio::test]
async fn test_barcode_without_pos_is_dropped_silently() {
    let relay = Relay::start().await;
    let mut scanner = relay.join("/scanner/S1").await;

    send_json(&mut scanner, json!({"type": "barcode", "code": "1"})).await;

    // The connection stays usable: ping still gets a pong
    assert_quiet(&mut scanner).await;
    send_json(&mut scanner, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut scanner).await["type"], "pong");

    relay.stop().await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let relay = Relay::start().await;
    let mut pos_a = relay.join("/pos/A").await;
    let mut scanner_a = relay.join("/scanner/A").await;
    let mut pos_b = relay.join("/pos/B").await;
    let _ = next_json(&mut pos_a).await;
    let _ = next_json(&mut scanner_a).await;

    send_json(&mut scanner_a, json!({"type": "barcode", "code": "only-for-A"})).await;

    assert_eq!(next_json(&mut pos_a).await["code"], "only-for-A");
    assert_quiet(&mut pos_b).await;

    relay.stop().await;
}

// ── Liveness and unknown frames ───────────────────────────────────────────────

#[tokio::test]
async fn test_ping_and_heartbeat_are_answered_locally() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;
    let mut scanner = relay.join("/scanner/S1").await;
    let _ = next_json(&mut pos).await;
    let _ = next_json(&mut scanner).await;

    send_json(&mut scanner, json!({"type": "ping", "timestamp": 1})).await;
    let pong = next_json(&mut scanner).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["sessionId"], "S1");

    send_json(&mut scanner, json!({"type": "heartbeat"})).await;
    assert_eq!(next_json(&mut scanner).await["type"], "heartbeat_response");

    // Neither reaches the POS
    assert_quiet(&mut pos).await;

    relay.stop().await;
}

#[tokio::test]
async fn test_unknown_and_malformed_frames_keep_connection_open() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;

    send_json(&mut pos, json!({"type": "teleport"})).await;
    pos.send(Message::Text("not json".into())).await.unwrap();
    pos.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    send_json(&mut pos, json!({"type": "ping"})).await;

    assert_eq!(next_json(&mut pos).await["type"], "pong");

    relay.stop().await;
}

// ── Edge cases ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_scanner_supersedes_first() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;
    let mut first = relay.join("/scanner/S1").await;
    let _ = next_json(&mut pos).await;
    let _ = next_json(&mut first).await;

    // Act: a second scanner takes the slot
    let mut second = relay.join("/scanner/S1").await;

    // Assert: the first is closed normally, so it will not reconnect
    let frame = next_close(&mut first).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1000);

    // The newcomer is paired and its scans reach the POS
    assert_eq!(next_json(&mut second).await["type"], "pos_status");
    let status = next_json(&mut pos).await;
    assert_eq!(status["type"], "scanner_status");
    assert_eq!(status["status"], "connected");

    send_json(&mut second, json!({"type": "barcode", "code": "from-second"})).await;
    assert_eq!(next_json(&mut pos).await["code"], "from-second");

    // The superseded disconnect must not tell the POS the scanner left
    assert_quiet(&mut pos).await;

    relay.stop().await;
}

#[tokio::test]
async fn test_scanner_storm_leaves_exactly_one_open() {
    // Arrange
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/STORM").await;

    // Act: eight phones race for the same scanner slot
    let mut scanners = join_all((0..8).map(|_| relay.connect("/scanner/STORM"))).await;
    let mut outcomes = Vec::new();
    for ws in &mut scanners {
        outcomes.push(close_code_or_quiet(ws).await);
    }

    // Assert: every loser was closed normally and one socket stayed open
    let open: Vec<usize> = (0..outcomes.len()).filter(|&i| outcomes[i].is_none()).collect();
    assert_eq!(open.len(), 1, "outcomes: {outcomes:?}");
    assert!(outcomes.iter().flatten().all(|&code| code == 1000), "outcomes: {outcomes:?}");

    // The POS only ever heard that a scanner connected
    loop {
        match timeout(QUIET, next_json(&mut pos)).await {
            Ok(status) => {
                assert_eq!(status["type"], "scanner_status");
                assert_eq!(status["status"], "connected");
            }
            Err(_) => break,
        }
    }

    // Only the survivor receives the POS command
    send_json(&mut pos, json!({"type": "command", "command": "beep"})).await;
    let survivor = &mut scanners[open[0]];
    let command = next_json(survivor).await;
    assert_eq!(command["type"], "command");
    assert_eq!(command["command"], "beep");

    relay.stop().await;
}

#[tokio::test]
async fn test_invalid_path_is_closed_with_policy_violation() {
    let relay = Relay::start().await;
    let overlong = format!("/scanner/{}", "x".repeat(129));

    for path in ["/printer/S1", "/scanner", "/pos/S1/extra", "/", overlong.as_str()] {
        let mut ws = relay.connect(path).await;

        let frame = next_close(&mut ws).await.expect("close frame");

        assert_eq!(u16::from(frame.code), 1008, "path {path}");
        assert_eq!(frame.reason, "Invalid connection type or sessionId");
    }

    relay.stop().await;
}

#[tokio::test]
async fn test_url_safe_session_ids_are_accepted() {
    let relay = Relay::start().await;

    for (path, session) in [
        ("/pos/order.42", "order.42"),
        ("/pos/caja~1", "caja~1"),
        ("/scanner/bad%20id", "bad id"),
    ] {
        let mut ws = relay.connect(path).await;
        let ack = next_json(&mut ws).await;
        assert_eq!(ack["type"], "connection", "path {path}");
        assert_eq!(ack["sessionId"], session);
    }

    relay.stop().await;
}

/// Sends one raw HTTP/1.1 request and reads the whole response.
async fn raw_http(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn test_plain_http_gets_health_response() {
    let relay = Relay::start().await;

    for path in ["/", "/status", "/pos/S1"] {
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        let response = raw_http(relay.addr, &request).await;

        assert!(response.starts_with("HTTP/1.1 200 OK"), "path {path}: {response}");
        assert!(response.ends_with("scanlink relay is running"), "path {path}");
    }

    relay.stop().await;
}

#[tokio::test]
async fn test_head_request_gets_headers_only() {
    let relay = Relay::start().await;

    let response = raw_http(
        relay.addr,
        "HEAD / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("\r\n\r\n"), "HEAD must not carry a body: {response}");

    relay.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_peers_with_going_away() {
    let relay = Relay::start().await;
    let mut pos = relay.join("/pos/S1").await;
    let mut scanner = relay.join("/scanner/S1").await;
    let _ = next_json(&mut pos).await;
    let _ = next_json(&mut scanner).await;

    // Act
    relay.running.store(false, Ordering::Relaxed);

    // Assert
    for ws in [&mut pos, &mut scanner] {
        let frame = next_close(ws).await.expect("close frame");
        assert_eq!(u16::from(frame.code), 1001);
    }
    let finished = timeout(WAIT, relay.task).await.expect("server exits");
    assert!(finished.expect("task joined").is_ok());
}
