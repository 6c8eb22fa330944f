//! Error types shared across the server.
//!
//! Startup and listener plumbing use `anyhow`; the enums here cover the
//! per-connection paths where the caller needs to branch on the variant.

use thiserror::Error;

use crate::connection::state::Event;

/// Why a handshake did not produce a registered nickname.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("transport error during handshake: {0}")]
    Transport(String),

    #[error("handshake timed out")]
    Timeout,

    #[error("connection closed before handshake")]
    Closed,

    #[error("expected NICK, got {0:?}")]
    Malformed(String),

    #[error("invalid nickname {0:?}")]
    InvalidNickname(String),

    #[error("nickname {0:?} already in use")]
    NicknameInUse(String),

    #[error("nickname {0:?} contains forbidden words")]
    ForbiddenNickname(String),

    #[error("server is shutting down")]
    ShuttingDown,
}

impl HandshakeError {
    /// The `ERR` line sent to the client before closing, if any.
    ///
    /// Transport-level failures close silently. A refusal during shutdown
    /// gets the shutdown notice instead.
    pub fn reply(&self) -> Option<&'static str> {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Closed | Self::ShuttingDown => None,
            Self::Malformed(_) => Some("ERR Expected: NICK <name>"),
            Self::InvalidNickname(_) => Some("ERR Invalid nickname"),
            Self::NicknameInUse(_) => Some("ERR Nickname already in use"),
            Self::ForbiddenNickname(_) => Some("ERR Nickname contains forbidden words"),
        }
    }

    /// Event name written to the operational log.
    pub fn log_event(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Closed => "HANDSHAKE_FAIL",
            Self::Malformed(_) => "BAD_HANDSHAKE",
            Self::InvalidNickname(_) => "BAD_NICK",
            Self::NicknameInUse(_) => "DUPLICATE_NICK",
            Self::ForbiddenNickname(_) => "FORBIDDEN_NICK",
            Self::ShuttingDown => "SHUTDOWN_REFUSED",
        }
    }
}

/// An event arrived that the connection state machine does not accept.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("event {event:?} is not valid in state {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: Event,
}

/// Failure reading or writing chat history.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// The peer's outbound queue is full or its writer has gone away.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue full")]
    Full,

    #[error("connection closed")]
    Closed,
}
