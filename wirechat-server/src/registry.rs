//! The shared table of registered connections.
//!
//! A connection enters the registry once its handshake succeeds and leaves
//! during teardown (or earlier, if a broadcast finds it unreachable). All
//! state lives behind one mutex; no lock is held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::SendError;
use crate::transport::Outbound;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a session was asked to stop from outside its own read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Kicked,
    Shutdown,
    SendFailed,
}

/// Send/close capability for one connection.
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<Outbound>,
    stop: Arc<watch::Sender<Option<StopReason>>>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<Outbound>) -> (Self, watch::Receiver<Option<StopReason>>) {
        let (stop, stop_rx) = watch::channel(None);
        (
            Self {
                tx,
                stop: Arc::new(stop),
            },
            stop_rx,
        )
    }

    /// Queue a line without waiting.
    pub fn try_send(&self, line: impl Into<String>) -> Result<(), SendError> {
        self.tx.try_send(Outbound::Line(line.into())).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queue a line, waiting for queue space.
    pub async fn send(&self, line: impl Into<String>) -> Result<(), SendError> {
        self.tx
            .send(Outbound::Line(line.into()))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Queue a close frame without waiting for it to go out.
    pub fn try_close(&self, code: u16, reason: &str) -> Result<(), SendError> {
        self.tx
            .try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
                ack: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Queue a close frame and wait until the writer has sent it.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), SendError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
                ack: Some(ack),
            })
            .await
            .map_err(|_| SendError::Closed)?;
        done.await.map_err(|_| SendError::Closed)
    }

    /// Ask the owning session to stop. The first reason wins.
    pub fn stop(&self, reason: StopReason) {
        self.stop.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

/// A registered connection.
#[derive(Clone)]
pub struct Client {
    pub nick: String,
    pub peer: String,
    pub handle: ClientHandle,
}

/// Outcome of removing a connection during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// `None` if the connection had already been evicted.
    pub nick: Option<String>,
    pub was_admin: bool,
    /// The connection was kicked; its departure notice is suppressed.
    pub kicked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    NicknameInUse,
    /// Shutdown has started; nobody new joins.
    Sealed,
}

/// Several live nicknames differ only in case and none matches exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousNick(pub Vec<String>);

#[derive(Default)]
struct Inner {
    clients: HashMap<ConnId, Client>,
    admins: HashSet<ConnId>,
    kicked: HashSet<ConnId>,
    sealed: bool,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-sensitive check against live nicknames.
    pub fn is_nick_taken(&self, nick: &str) -> bool {
        self.inner.lock().clients.values().any(|c| c.nick == nick)
    }

    /// Check uniqueness and insert in one step, so two concurrent
    /// handshakes can never both claim the same nickname.
    pub fn register(&self, id: ConnId, client: Client) -> Result<(), RegisterError> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(RegisterError::Sealed);
        }
        if inner.clients.values().any(|c| c.nick == client.nick) {
            return Err(RegisterError::NicknameInUse);
        }
        inner.clients.insert(id, client);
        Ok(())
    }

    /// Refuse all further registrations. The delivery set can only shrink
    /// from here on.
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    /// Remove a connection and all its flags. Safe to call more than once.
    pub fn remove(&self, id: ConnId) -> Departure {
        let mut inner = self.inner.lock();
        let nick = inner.clients.remove(&id).map(|c| c.nick);
        let was_admin = inner.admins.remove(&id);
        let kicked = inner.kicked.remove(&id);
        Departure {
            nick,
            was_admin,
            kicked,
        }
    }

    /// Drop unreachable connections from the delivery set. Their kick flag
    /// is kept until teardown.
    pub fn evict(&self, ids: &[ConnId]) -> Vec<Client> {
        let mut inner = self.inner.lock();
        let mut evicted = Vec::with_capacity(ids.len());
        for id in ids {
            inner.admins.remove(id);
            if let Some(client) = inner.clients.remove(id) {
                evicted.push(client);
            }
        }
        evicted
    }

    /// Grant admin to a registered connection. Returns false if the
    /// connection is not registered.
    pub fn grant_admin(&self, id: ConnId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.clients.contains_key(&id) {
            return false;
        }
        inner.admins.insert(id);
        true
    }

    pub fn is_admin(&self, id: ConnId) -> bool {
        self.inner.lock().admins.contains(&id)
    }

    /// Flag a registered connection as kicked. Returns false if it has
    /// already left the registry.
    pub fn mark_kicked(&self, id: ConnId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.clients.contains_key(&id) {
            return false;
        }
        inner.kicked.insert(id);
        true
    }

    pub fn is_kicked(&self, id: ConnId) -> bool {
        self.inner.lock().kicked.contains(&id)
    }

    /// Case-insensitive nickname lookup. An exact-case match wins; otherwise
    /// the match must be unique.
    pub fn find_by_nick(&self, nick: &str) -> Result<Option<(ConnId, Client)>, AmbiguousNick> {
        let inner = self.inner.lock();
        if let Some((id, c)) = inner.clients.iter().find(|(_, c)| c.nick == nick) {
            return Ok(Some((*id, c.clone())));
        }

        let wanted = nick.to_lowercase();
        let mut matches: Vec<_> = inner
            .clients
            .iter()
            .filter(|(_, c)| c.nick.to_lowercase() == wanted)
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop().map(|(id, c)| (*id, c.clone()))),
            _ => {
                let mut names: Vec<String> = matches.iter().map(|(_, c)| c.nick.clone()).collect();
                names.sort();
                Err(AmbiguousNick(names))
            }
        }
    }

    /// Copy of the delivery set, for iterating without holding the lock.
    pub fn snapshot(&self) -> Vec<(ConnId, Client)> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .clients
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Live nicknames, sorted.
    pub fn nicknames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().clients.values().map(|c| c.nick.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
