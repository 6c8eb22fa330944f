//! Per-connection lifecycle.
//!
//! ```text
//! Connecting -> AwaitingNick -> Active -> Closing -> Closed
//!                    |                                 ^
//!                    +---------- HandshakeFailed ------+
//! ```
//!
//! Close-triggering events in `Closing` are absorbed so that racing error
//! paths keep the first cause, and `TornDown` is accepted only once.

use crate::error::TransitionError;
use crate::registry::StopReason;

/// Why an active connection is closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    Quit,
    /// Peer went away or a read failed.
    Disconnected,
    TransportError,
    Oversized,
    Kicked,
    Shutdown,
}

impl From<StopReason> for CloseCause {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Kicked => Self::Kicked,
            StopReason::Shutdown => Self::Shutdown,
            StopReason::SendFailed => Self::TransportError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Accepted,
    HandshakeFailed,
    Registered(String),
    Close(CloseCause),
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    AwaitingNick,
    Active { nick: String },
    Closing { nick: String, cause: CloseCause },
    Closed,
}

impl ConnState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::AwaitingNick => "AwaitingNick",
            Self::Active { .. } => "Active",
            Self::Closing { .. } => "Closing",
            Self::Closed => "Closed",
        }
    }

    /// Apply `event`, returning the next state.
    pub fn on(self, event: Event) -> Result<ConnState, TransitionError> {
        match (self, event) {
            (Self::Connecting, Event::Accepted) => Ok(Self::AwaitingNick),
            (Self::AwaitingNick, Event::HandshakeFailed) => Ok(Self::Closed),
            (Self::AwaitingNick, Event::Registered(nick)) => Ok(Self::Active { nick }),
            (Self::Active { nick }, Event::Close(cause)) => Ok(Self::Closing { nick, cause }),
            (closing @ Self::Closing { .. }, Event::Close(_)) => Ok(closing),
            (Self::Closing { .. }, Event::TornDown) => Ok(Self::Closed),
            (state, event) => Err(TransitionError {
                state: state.name(),
                event,
            }),
        }
    }

    pub fn nick(&self) -> Option<&str> {
        match self {
            Self::Active { nick } | Self::Closing { nick, .. } => Some(nick),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(nick: &str) -> ConnState {
        ConnState::Connecting
            .on(Event::Accepted)
            .and_then(|s| s.on(Event::Registered(nick.into())))
            .unwrap()
    }

    #[test]
    fn happy_path() {
        let s = active("alice");
        assert_eq!(s, ConnState::Active { nick: "alice".into() });
        let s = s.on(Event::Close(CloseCause::Quit)).unwrap();
        assert_eq!(s.nick(), Some("alice"));
        let s = s.on(Event::TornDown).unwrap();
        assert!(s.is_closed());
    }

    #[test]
    fn failed_handshake_goes_straight_to_closed() {
        let s = ConnState::Connecting.on(Event::Accepted).unwrap();
        assert_eq!(s.on(Event::HandshakeFailed).unwrap(), ConnState::Closed);
    }

    #[test]
    fn first_close_cause_wins() {
        let s = active("bob")
            .on(Event::Close(CloseCause::Kicked))
            .and_then(|s| s.on(Event::Close(CloseCause::Disconnected)))
            .unwrap();
        assert_eq!(
            s,
            ConnState::Closing {
                nick: "bob".into(),
                cause: CloseCause::Kicked
            }
        );
    }

    #[test]
    fn teardown_happens_once() {
        let closed = active("bob")
            .on(Event::Close(CloseCause::Quit))
            .and_then(|s| s.on(Event::TornDown))
            .unwrap();
        let err = closed.on(Event::TornDown).unwrap_err();
        assert_eq!(err.state, "Closed");
        assert_eq!(err.event, Event::TornDown);
    }

    #[test]
    fn cannot_chat_before_handshake() {
        let s = ConnState::Connecting.on(Event::Accepted).unwrap();
        assert!(s.on(Event::Close(CloseCause::Quit)).is_err());
        assert!(ConnState::Connecting.on(Event::Registered("x".into())).is_err());
    }

    #[test]
    fn stop_reasons_map_to_causes() {
        assert_eq!(CloseCause::from(StopReason::Kicked), CloseCause::Kicked);
        assert_eq!(CloseCause::from(StopReason::SendFailed), CloseCause::TransportError);
    }
}
