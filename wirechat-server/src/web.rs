//! WebSocket transport and health endpoint.
//!
//! `/` and `/chat` upgrade to a WebSocket, which is bridged to a session
//! through the channel pair in [`crate::transport`]. One text frame carries
//! one line; binary frames are decoded lossily.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::connection;
use crate::protocol::VERSION;
use crate::server::SharedState;
use crate::transport::{self, Bridge, CLOSE_NORMAL, Inbound, Outbound};

/// Upper bound on a single socket write.
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(30);

// ── Axum router ────────────────────────────────────────────────────────

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/chat", get(ws_upgrade))
        .route("/api/v1/health", get(api_health))
        .with_state(state)
}

// ── WebSocket handler ──────────────────────────────────────────────────

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<SharedState>>,
) -> impl IntoResponse {
    if state.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    // Leave room for multi-byte characters so most over-long lines reach the
    // session intact; anything beyond this arrives as `Inbound::Oversized`.
    let max_bytes = state.config.max_message_len.saturating_mul(4).saturating_add(1024);
    ws.max_message_size(max_bytes)
        .on_upgrade(move |socket| handle_ws(socket, state, addr))
        .into_response()
}

async fn handle_ws(socket: WebSocket, state: Arc<SharedState>, addr: SocketAddr) {
    let (transport, bridge) = transport::pair(addr.to_string());
    let session = tokio::spawn(connection::handle(Arc::clone(&state), transport));

    let ping_interval = Duration::from_secs(state.config.ping_interval_secs);
    let ping_timeout = Duration::from_secs(state.config.ping_timeout_secs);
    pump(socket, bridge, ping_interval, ping_timeout).await;

    if let Err(e) = session.await {
        tracing::error!(peer = %addr, "Session task failed: {e}");
    }
}

/// Shuttle frames between the socket and the session until either side
/// ends. Also runs the keep-alive: a ping every `ping_interval`, and no
/// pong within `ping_timeout` ends the connection.
async fn pump(mut socket: WebSocket, bridge: Bridge, ping_interval: Duration, ping_timeout: Duration) {
    let Bridge {
        inbound,
        mut outbound,
    } = bridge;
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    let mut pong_deadline: Option<Instant> = None;
    // The socket stream is fused after any error, including an oversized
    // frame; writes still work, so the session's reply and close go out.
    let mut reading = true;

    loop {
        let deadline = pong_deadline;
        tokio::select! {
            frame = socket.recv(), if reading => {
                let line = match frame {
                    Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(WsMessage::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(WsMessage::Pong(_))) => {
                        pong_deadline = None;
                        continue;
                    }
                    Some(Ok(WsMessage::Ping(_))) => continue, // answered by axum
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) if is_oversized(&e) => {
                        tracing::debug!("Rejected oversized frame: {e}");
                        reading = false;
                        if inbound.send(Inbound::Oversized).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        let _ = inbound.send(Inbound::Error(e.to_string())).await;
                        break;
                    }
                };
                if inbound.send(Inbound::Line(line)).await.is_err() {
                    break;
                }
            }
            msg = outbound.recv() => match msg {
                Some(Outbound::Line(line)) => {
                    if let Err(e) = send(&mut socket, WsMessage::Text(line.into())).await {
                        tracing::debug!("WebSocket send failed, closing bridge: {e}");
                        let _ = inbound.send(Inbound::Error(e)).await;
                        break;
                    }
                }
                Some(Outbound::Close { code, reason, ack }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = send(&mut socket, WsMessage::Close(Some(frame))).await;
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
                None => {
                    let frame = CloseFrame { code: CLOSE_NORMAL, reason: "".into() };
                    let _ = send(&mut socket, WsMessage::Close(Some(frame))).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if pong_deadline.is_none() {
                    if send(&mut socket, WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    pong_deadline = Some(Instant::now() + ping_timeout);
                }
            }
            _ = wait_until(deadline) => {
                tracing::info!("Ping timeout");
                let _ = inbound.send(Inbound::Error("ping timeout".to_string())).await;
                break;
            }
        }
    }
}

async fn send(socket: &mut WebSocket, msg: WsMessage) -> Result<(), String> {
    match tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("send timed out".to_string()),
    }
}

/// The frame exceeded `max_message_size`.
fn is_oversized(e: &axum::Error) -> bool {
    std::error::Error::source(e)
        .and_then(|inner| inner.downcast_ref::<WsError>())
        .is_some_and(|inner| matches!(inner, WsError::Capacity(_)))
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── REST ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    users: usize,
    uptime_secs: u64,
    messages_session: u64,
}

async fn api_health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_shutting_down() { "shutting_down" } else { "ok" },
        version: VERSION,
        users: state.registry.len(),
        uptime_secs: state.uptime().as_secs(),
        messages_session: state.messages_session(),
    })
}
