//! End-to-end tests using a real WebSocket client.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use wirechat_server::config::ServerConfig;
use wirechat_server::server::{Server, ShutdownTrigger};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    trigger: ShutdownTrigger,
    handle: JoinHandle<anyhow::Result<()>>,
    _dir: TempDir,
}

async fn boot_server() -> TestServer {
    boot_server_with(|_| {}).await
}

async fn boot_server_with(tweak: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        log_dir: dir.path().join("logs"),
        admin_token: Some("s3cret".into()),
        restart_marker: dir.path().join("restart"),
        forbidden_words: vec!["darn".into()],
        ..Default::default()
    };
    tweak(&mut config);
    let (addr, trigger, handle) = Server::new(config).start().await.unwrap();
    TestServer {
        addr,
        trigger,
        handle,
        _dir: dir,
    }
}

async fn connect(addr: SocketAddr, path: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

/// Next frame that is not a keep-alive.
async fn recv(ws: &mut WsStream) -> Message {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");
        if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
            return msg;
        }
    }
}

async fn recv_text(ws: &mut WsStream) -> String {
    match recv(ws).await {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn recv_close(ws: &mut WsStream) -> u16 {
    match recv(ws).await {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected close, got {other:?}"),
    }
}

async fn send(ws: &mut WsStream, line: &str) {
    ws.send(Message::text(line)).await.unwrap();
}

async fn join(addr: SocketAddr, nick: &str) -> WsStream {
    let mut ws = connect(addr, "/chat").await;
    assert_eq!(recv_text(&mut ws).await, "SYS Welcome to Wirechat v1.0.0");
    assert_eq!(recv_text(&mut ws).await, "SYS Send: NICK <name>");
    send(&mut ws, &format!("NICK {nick}")).await;
    assert_eq!(recv_text(&mut ws).await, format!("SYS {nick} joined the chat!"));
    ws
}

#[tokio::test]
async fn chat_round_trip() {
    let server = boot_server().await;
    let mut alice = join(server.addr, "alice").await;
    let mut bob = join(server.addr, "bob").await;
    assert_eq!(recv_text(&mut alice).await, "SYS bob joined the chat!");

    send(&mut alice, "MSG hi bob").await;
    assert!(recv_text(&mut bob).await.ends_with("] alice: hi bob"));
    assert!(recv_text(&mut alice).await.ends_with("] alice: hi bob"));

    send(&mut bob, "MSG well d4rn").await;
    assert_eq!(recv_text(&mut bob).await, "ERR Message contains forbidden words");

    bob.close(None).await.unwrap();
    assert_eq!(recv_text(&mut alice).await, "SYS bob left the chat!");
}

#[tokio::test]
async fn root_path_also_accepts_clients() {
    let server = boot_server().await;
    let mut ws = connect(server.addr, "/").await;
    assert_eq!(recv_text(&mut ws).await, "SYS Welcome to Wirechat v1.0.0");
}

#[tokio::test]
async fn bad_handshake_closes_normally() {
    let server = boot_server().await;
    let mut ws = connect(server.addr, "/chat").await;
    recv_text(&mut ws).await;
    recv_text(&mut ws).await;
    send(&mut ws, "NICK has space").await;
    assert_eq!(recv_text(&mut ws).await, "ERR Invalid nickname");
    assert_eq!(recv_close(&mut ws).await, 1000);
}

#[tokio::test]
async fn kicked_client_sees_4000() {
    let server = boot_server().await;
    let mut admin = join(server.addr, "admin").await;
    let mut target = join(server.addr, "target").await;
    assert_eq!(recv_text(&mut admin).await, "SYS target joined the chat!");

    send(&mut admin, "ADMIN s3cret").await;
    assert_eq!(recv_text(&mut admin).await, "SYS Admin privileges granted");
    send(&mut admin, "KICK target").await;

    assert_eq!(recv_text(&mut target).await, "SYS You were kicked by an admin");
    assert_eq!(recv_close(&mut target).await, 4000);
    assert_eq!(recv_text(&mut admin).await, "SYS target was kicked by an admin");
}

#[tokio::test]
async fn oversized_line_sees_1009() {
    let server = boot_server().await;
    let mut ws = join(server.addr, "big").await;
    send(&mut ws, &format!("MSG {}", "y".repeat(4000))).await;
    assert_eq!(recv_text(&mut ws).await, "ERR Message too large");
    assert_eq!(recv_close(&mut ws).await, 1009);
}

#[tokio::test]
async fn line_beyond_frame_limit_sees_err_and_1009() {
    let server = boot_server().await;
    let mut watcher = join(server.addr, "watcher").await;
    let mut ws = join(server.addr, "huge").await;
    assert_eq!(recv_text(&mut watcher).await, "SYS huge joined the chat!");

    send(&mut ws, &format!("MSG {}", "y".repeat(20_000))).await;
    assert_eq!(recv_text(&mut ws).await, "ERR Message too large");
    assert_eq!(recv_close(&mut ws).await, 1009);
    assert_eq!(recv_text(&mut watcher).await, "SYS huge left the chat!");
}

#[tokio::test]
async fn unanswered_ping_ends_the_session() {
    let server = boot_server_with(|c| {
        c.ping_interval_secs = 1;
        c.ping_timeout_secs = 1;
    })
    .await;
    let mut watcher = join(server.addr, "watcher").await;
    // Never polled again after joining, so its pongs never go out.
    let _silent = join(server.addr, "silent").await;
    assert_eq!(recv_text(&mut watcher).await, "SYS silent joined the chat!");

    assert_eq!(recv_text(&mut watcher).await, "SYS silent left the chat!");

    // The watcher keeps answering pings and outlives several deadlines.
    assert!(
        timeout(Duration::from_millis(2500), recv(&mut watcher)).await.is_err(),
        "watcher got an unexpected frame"
    );
    send(&mut watcher, "WHO").await;
    assert_eq!(recv_text(&mut watcher).await, "SYS Online (1): watcher");
}

#[tokio::test]
async fn graceful_shutdown_notifies_then_closes() {
    let server = boot_server().await;
    let mut alice = join(server.addr, "alice").await;
    let mut bob = join(server.addr, "bob").await;
    assert_eq!(recv_text(&mut alice).await, "SYS bob joined the chat!");

    server.trigger.trigger();

    for ws in [&mut alice, &mut bob] {
        assert_eq!(recv_text(ws).await, "SYS Server shutting down");
        assert_eq!(recv_close(ws).await, 1001);
    }
    timeout(TIMEOUT, server.handle)
        .await
        .expect("server stops")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn health_endpoint_reports_users() {
    let server = boot_server().await;
    let _alice = join(server.addr, "alice").await;

    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /api/v1/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    timeout(TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();
    assert!(raw.starts_with("HTTP/1.1 200"), "{raw}");

    let body = raw.split_once("\r\n\r\n").unwrap().1;
    let health: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], "1.0.0");
    assert_eq!(health["users"], 1);
    assert_eq!(health["messages_session"], 0);
}
