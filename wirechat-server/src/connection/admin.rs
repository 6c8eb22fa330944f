//! ADMIN and KICK.

use super::Session;
use crate::broadcast::broadcast_except;
use crate::error::SendError;
use crate::protocol;
use crate::registry::{AmbiguousNick, StopReason};
use crate::transport::CLOSE_KICKED;

/// Grant admin on an exact token match. A wrong token and a missing one
/// get the same reply.
pub(super) async fn grant(session: &Session, token: &str) -> Result<(), SendError> {
    let state = &session.state;
    if token == state.admin_token && state.registry.grant_admin(session.id) {
        tracing::info!(conn = %session.id, nick = %session.nick(), "Admin granted");
        state.oplog.connection("ADMIN_GRANTED", session.nick());
        session.reply(protocol::sys("Admin privileges granted")).await
    } else {
        tracing::warn!(conn = %session.id, nick = %session.nick(), "Admin failed: bad token");
        state
            .oplog
            .error("ADMIN_FAIL", format!("{} {}", session.nick(), session.peer));
        session.reply(protocol::err("Invalid admin token")).await
    }
}

/// Kick a registered user by case-insensitive nickname, preferring an
/// exact-case match.
pub(super) async fn kick(session: &Session, target: &str) -> Result<(), SendError> {
    let state = &session.state;
    if !state.registry.is_admin(session.id) {
        return session.reply(protocol::err("Admin only command")).await;
    }
    if target.is_empty() {
        return session.reply(protocol::err("Expected: KICK <nickname>")).await;
    }

    let found = match state.registry.find_by_nick(target) {
        Ok(found) => found,
        Err(AmbiguousNick(names)) => {
            return session
                .reply(protocol::err(format!("Ambiguous nickname: {}", names.join(", "))))
                .await;
        }
    };
    let Some((target_id, victim)) = found else {
        return session
            .reply(protocol::err(format!("No such user: {target}")))
            .await;
    };
    if target_id == session.id {
        return session.reply(protocol::err("You cannot kick yourself")).await;
    }
    if !state.registry.mark_kicked(target_id) {
        // Left between the lookup and now.
        return session
            .reply(protocol::err(format!("No such user: {target}")))
            .await;
    }

    let _ = victim.handle.try_send(protocol::sys("You were kicked by an admin"));
    let _ = victim.handle.try_close(CLOSE_KICKED, "Kicked by admin");
    victim.handle.stop(StopReason::Kicked);

    tracing::info!(conn = %target_id, nick = %victim.nick, by = %session.nick(), "Kicked");
    state
        .oplog
        .connection("KICK", format!("{} by {}", victim.nick, session.nick()));
    broadcast_except(
        state,
        Some(target_id),
        &protocol::sys(format!("{} was kicked by an admin", victim.nick)),
    );
    Ok(())
}
