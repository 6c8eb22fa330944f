//! Transport-neutral frames exchanged between a socket bridge and a session.
//!
//! A session never touches a socket directly: it reads [`Inbound`] from one
//! channel and writes [`Outbound`] to another. The WebSocket bridge in
//! [`crate::web`] is the production pump; tests drive sessions with bare
//! channels.

use tokio::sync::{mpsc, oneshot};

/// Normal closure (handshake rejection).
pub const CLOSE_NORMAL: u16 = 1000;
/// Server going away (shutdown or restart).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Line exceeded the configured maximum.
pub const CLOSE_TOO_BIG: u16 = 1009;
/// Connection was kicked by an admin.
pub const CLOSE_KICKED: u16 = 4000;

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_BUFFER: usize = 4096;
/// Capacity of each connection's inbound queue.
pub const INBOUND_BUFFER: usize = 64;

/// Something the peer sent, or a failure reading from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Line(String),
    /// A frame too large for the transport to buffer. The connection is
    /// still open, so the session can answer before closing.
    Oversized,
    Error(String),
}

/// Something to deliver to the peer.
#[derive(Debug)]
pub enum Outbound {
    Line(String),
    /// Close the connection. `ack` fires once the close frame has been
    /// handed to the socket.
    Close {
        code: u16,
        reason: String,
        ack: Option<oneshot::Sender<()>>,
    },
}

/// The session's side of a bridged connection.
pub struct Transport {
    /// Peer address, for diagnostics only.
    pub peer: String,
    pub inbound: mpsc::Receiver<Inbound>,
    pub outbound: mpsc::Sender<Outbound>,
}

/// The bridge's side of a bridged connection.
pub struct Bridge {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Create a connected `(Transport, Bridge)` pair.
pub fn pair(peer: impl Into<String>) -> (Transport, Bridge) {
    let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    (
        Transport {
            peer: peer.into(),
            inbound: in_rx,
            outbound: out_tx,
        },
        Bridge {
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}
