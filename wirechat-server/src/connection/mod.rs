//! Per-client connection handler.
//!
//! Each accepted transport gets a [`Session`] that manages:
//! - the NICK handshake and registration
//! - history replay for the new member
//! - the read loop and command dispatch
//! - teardown, exactly once, whatever ended the connection
//!
//! Submodules:
//! - [`state`]: the explicit lifecycle state machine
//! - [`handshake`]: banner, NICK read and validation
//! - [`commands`]: the `Active` command dispatcher
//! - [`admin`]: ADMIN and KICK

mod admin;
mod commands;
mod handshake;
pub mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::broadcast::broadcast;
use crate::error::{HandshakeError, SendError};
use crate::protocol::{self, REPLAY_END};
use crate::registry::{ClientHandle, ConnId, StopReason};
use crate::server::SharedState;
use crate::transport::{CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_TOO_BIG, Inbound, Transport};

use self::state::{CloseCause, ConnState, Event};

/// What the read loop does after a line.
pub(crate) enum Flow {
    Continue,
    Close(CloseCause),
}

pub(crate) struct Session {
    id: ConnId,
    peer: String,
    state: Arc<SharedState>,
    handle: ClientHandle,
    lifecycle: ConnState,
}

impl Session {
    fn nick(&self) -> &str {
        self.lifecycle.nick().unwrap_or("-")
    }

    fn advance(&mut self, event: Event) {
        match self.lifecycle.clone().on(event) {
            Ok(next) => self.lifecycle = next,
            Err(e) => tracing::error!(conn = %self.id, "Lifecycle error: {e}"),
        }
    }

    /// Direct reply to this connection.
    async fn reply(&self, line: impl Into<String>) -> Result<(), SendError> {
        self.handle.send(line).await
    }
}

/// Drive one connection from accept to teardown.
pub async fn handle(state: Arc<SharedState>, transport: Transport) {
    let Transport {
        peer,
        mut inbound,
        outbound,
    } = transport;
    let id = state.next_conn_id();
    let (handle, mut stop_rx) = ClientHandle::new(outbound);

    tracing::info!(conn = %id, %peer, "New connection");
    state.oplog.connection("CONNECT_ATTEMPT", &peer);

    let mut session = Session {
        id,
        peer,
        state,
        handle,
        lifecycle: ConnState::Connecting,
    };
    session.advance(Event::Accepted);

    match handshake::negotiate(&session, &mut inbound).await {
        Ok(nick) => session.advance(Event::Registered(nick)),
        Err(e) => {
            tracing::info!(conn = %session.id, peer = %session.peer, "Handshake failed: {e}");
            session
                .state
                .oplog
                .error(e.log_event(), format!("{} {e}", session.peer));
            let farewell = session.state.farewell();
            if let (HandshakeError::ShuttingDown, Some(farewell)) = (&e, farewell) {
                let _ = session.reply(farewell.notice()).await;
                let _ = session.handle.close(CLOSE_GOING_AWAY, farewell.reason()).await;
            } else if let Some(reply) = e.reply() {
                let _ = session.reply(reply).await;
                let _ = session.handle.close(CLOSE_NORMAL, "Handshake failed").await;
            }
            session.advance(Event::HandshakeFailed);
            return;
        }
    }

    let nick = session.nick().to_string();
    tracing::info!(conn = %session.id, %nick, peer = %session.peer, "Registered");
    session
        .state
        .oplog
        .connection("CONNECT", format!("{nick} {}", session.peer));
    broadcast(&session.state, &protocol::sys(format!("{nick} joined the chat!")));

    let cause = match replay_history(&session).await {
        Ok(()) => read_loop(&session, &mut inbound, &mut stop_rx).await,
        Err(_) => CloseCause::Disconnected,
    };
    session.advance(Event::Close(cause));
    teardown(&mut session);
}

/// Send the tail of today's history, framed. Nothing is sent if it is empty.
async fn replay_history(session: &Session) -> Result<(), SendError> {
    let entries = match session.state.store.tail(session.state.config.history_lines) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(conn = %session.id, "Failed to load history: {e}");
            return Ok(());
        }
    };
    if entries.is_empty() {
        return Ok(());
    }

    session.reply(protocol::replay_start(entries.len())).await?;
    for entry in &entries {
        session.reply(entry.frame()).await?;
    }
    session.reply(REPLAY_END).await
}

async fn read_loop(
    session: &Session,
    inbound: &mut mpsc::Receiver<Inbound>,
    stop_rx: &mut watch::Receiver<Option<StopReason>>,
) -> CloseCause {
    let max_len = session.state.config.max_message_len;
    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    return CloseCause::Disconnected;
                }
                if let Some(reason) = *stop_rx.borrow_and_update() {
                    tracing::debug!(conn = %session.id, ?reason, "Stop requested");
                    return reason.into();
                }
            }
            msg = inbound.recv() => {
                let raw = match msg {
                    None => return CloseCause::Disconnected,
                    Some(Inbound::Error(e)) => {
                        tracing::warn!(conn = %session.id, "Transport error: {e}");
                        session
                            .state
                            .oplog
                            .error("CLIENT_ERROR", format!("{} {e}", session.nick()));
                        return CloseCause::TransportError;
                    }
                    Some(Inbound::Oversized) => return reject_oversized(session).await,
                    Some(Inbound::Line(raw)) => raw,
                };

                let line = raw.trim();
                if line.chars().count() > max_len {
                    return reject_oversized(session).await;
                }

                match commands::dispatch(session, line).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close(cause)) => return cause,
                    Err(_) => return CloseCause::TransportError,
                }
            }
        }
    }
}

async fn reject_oversized(session: &Session) -> CloseCause {
    session.state.oplog.error("MSG_TOO_LARGE", session.nick());
    let _ = session.reply(protocol::err("Message too large")).await;
    let _ = session.handle.close(CLOSE_TOO_BIG, "Message too large").await;
    CloseCause::Oversized
}

/// Remove from the registry and announce the departure. Runs once; a
/// kicked connection already had its own notice, and shutdown already
/// told everyone.
fn teardown(session: &mut Session) {
    let ConnState::Closing { nick, cause } = session.lifecycle.clone() else {
        return;
    };
    session.advance(Event::TornDown);

    let departure = session.state.registry.remove(session.id);
    tracing::info!(
        conn = %session.id,
        %nick,
        ?cause,
        was_admin = departure.was_admin,
        kicked = departure.kicked,
        "Connection closed"
    );
    session.state.oplog.connection("DISCONNECT", &nick);

    // The pump may drop its side before the stop signal lands, so a
    // shutdown can also surface here as a plain disconnect.
    let shutting_down = cause == CloseCause::Shutdown || session.state.is_shutting_down();
    if !departure.kicked && !shutting_down {
        broadcast(&session.state, &protocol::sys(format!("{nick} left the chat!")));
    }
}
