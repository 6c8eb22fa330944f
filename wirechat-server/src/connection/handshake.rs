//! Banner, NICK read and registration.

use std::time::Duration;

use tokio::sync::mpsc;

use super::Session;
use crate::error::HandshakeError;
use crate::protocol::{self, PROMPT};
use crate::registry::{Client, RegisterError};
use crate::transport::Inbound;

/// Longest handshake line echoed into logs.
const LOGGED_LINE_MAX: usize = 64;

/// Greet the peer, read exactly one line and register the nickname it
/// names. Checks run in order: shape, validity, collision, moderation.
pub(super) async fn negotiate(
    session: &Session,
    inbound: &mut mpsc::Receiver<Inbound>,
) -> Result<String, HandshakeError> {
    let send_failed = |e: crate::error::SendError| HandshakeError::Transport(e.to_string());
    session.reply(protocol::banner()).await.map_err(send_failed)?;
    session.reply(PROMPT).await.map_err(send_failed)?;

    let timeout = Duration::from_secs(session.state.config.handshake_timeout_secs);
    let line = match tokio::time::timeout(timeout, inbound.recv()).await {
        Err(_) => return Err(HandshakeError::Timeout),
        Ok(None) => return Err(HandshakeError::Closed),
        Ok(Some(Inbound::Error(e))) => return Err(HandshakeError::Transport(e)),
        Ok(Some(Inbound::Oversized)) => {
            return Err(HandshakeError::Malformed("<oversized>".into()));
        }
        Ok(Some(Inbound::Line(line))) => line,
    };

    let Some(nick) = protocol::parse_nick(&line) else {
        return Err(HandshakeError::Malformed(
            line.chars().take(LOGGED_LINE_MAX).collect(),
        ));
    };
    if !protocol::valid_nickname(nick) {
        return Err(HandshakeError::InvalidNickname(nick.chars().take(LOGGED_LINE_MAX).collect()));
    }

    let state = &session.state;
    if state.registry.is_nick_taken(nick) {
        return Err(HandshakeError::NicknameInUse(nick.to_string()));
    }
    if state.filter.contains_forbidden(nick) {
        return Err(HandshakeError::ForbiddenNickname(nick.to_string()));
    }

    // A concurrent handshake may have claimed the name since the check
    // above, or the shutdown sweep may have sealed the registry.
    state
        .registry
        .register(
            session.id,
            Client {
                nick: nick.to_string(),
                peer: session.peer.clone(),
                handle: session.handle.clone(),
            },
        )
        .map_err(|e| match e {
            RegisterError::NicknameInUse => HandshakeError::NicknameInUse(nick.to_string()),
            RegisterError::Sealed => HandshakeError::ShuttingDown,
        })?;
    Ok(nick.to_string())
}
