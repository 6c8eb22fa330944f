//! Command dispatch for active connections.

use super::state::CloseCause;
use super::{Flow, Session, admin};
use crate::broadcast::broadcast;
use crate::error::SendError;
use crate::history::{MessageRecord, RecordKind};
use crate::protocol::{self, Command, PONG, VERSION};

/// Handle one trimmed line from a registered connection.
pub(super) async fn dispatch(session: &Session, line: &str) -> Result<Flow, SendError> {
    let state = &session.state;
    match Command::parse(line) {
        Command::Msg(text) => chat(session, RecordKind::Text, text).await?,
        Command::Img(url) => {
            if protocol::valid_image_url(url) {
                chat(session, RecordKind::Image, url).await?;
            } else {
                state
                    .oplog
                    .error("BAD_IMG", format!("{} {url:?}", session.nick()));
                session.reply(protocol::err("Expected: IMG <url>")).await?;
            }
        }
        Command::Who => {
            let names = state.registry.nicknames();
            session
                .reply(protocol::sys(format!("Online ({}): {}", names.len(), names.join(", "))))
                .await?;
        }
        Command::Version => {
            session
                .reply(protocol::sys(format!("Wirechat server v{VERSION}")))
                .await?;
        }
        Command::Help => session.reply(protocol::help_text()).await?,
        Command::Ping => session.reply(PONG).await?,
        Command::Uptime => {
            let uptime = protocol::format_uptime(state.uptime());
            session.reply(protocol::sys(format!("Uptime: {uptime}"))).await?;
        }
        Command::Stats => {
            let stats = format!(
                "Users: {} | Uptime: {} | Messages (session): {}",
                state.registry.len(),
                protocol::format_uptime(state.uptime()),
                state.messages_session()
            );
            session.reply(protocol::sys(stats)).await?;
        }
        Command::Admin(token) => admin::grant(session, token).await?,
        Command::Kick(target) => admin::kick(session, target).await?,
        Command::Quit => {
            state.oplog.connection("QUIT", session.nick());
            return Ok(Flow::Close(CloseCause::Quit));
        }
        Command::Nick => {
            session
                .reply(protocol::err("Nickname cannot be changed"))
                .await?;
        }
        Command::Unknown => {
            state
                .oplog
                .error("BAD_MSG", format!("{} {line:?}", session.nick()));
            session.reply(protocol::err("Expected: MSG <text>")).await?;
        }
    }
    Ok(Flow::Continue)
}

/// Moderate, persist, count and broadcast one chat or image message.
async fn chat(session: &Session, kind: RecordKind, payload: &str) -> Result<(), SendError> {
    let state = &session.state;
    if state.filter.contains_forbidden(payload) {
        tracing::info!(conn = %session.id, nick = %session.nick(), "Message rejected by filter");
        state.oplog.error("FORBIDDEN_MSG", session.nick());
        return session
            .reply(protocol::err("Message contains forbidden words"))
            .await;
    }

    let record = MessageRecord::now(session.nick(), kind, payload);
    state.persist(&record);
    state.count_message();
    broadcast(state, &record.frame());
    Ok(())
}
