//! Server state and listener lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::db::SqliteStore;
use crate::history::{FileStore, MessageRecord, MessageStore};
use crate::moderation::ModerationFilter;
use crate::oplog::OpLog;
use crate::registry::{ConnId, Registry};
use crate::shutdown::Farewell;
use crate::{shutdown, web};

/// Shared state accessible by all connection handlers.
pub struct SharedState {
    pub config: ServerConfig,
    /// Secret for `ADMIN`, validated non-empty at startup.
    pub admin_token: String,
    pub registry: Registry,
    /// Forbidden patterns, compiled once.
    pub filter: ModerationFilter,
    /// Chat history (flat files, or SQLite with `--db-path`).
    pub store: Arc<dyn MessageStore>,
    pub oplog: OpLog,
    pub started: Instant,
    /// Accepted MSG and IMG since startup.
    messages_session: AtomicU64,
    next_conn: AtomicU64,
    /// Set once when the shutdown sweep starts.
    farewell: OnceLock<Farewell>,
}

impl SharedState {
    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn messages_session(&self) -> u64 {
        self.messages_session.load(Ordering::Relaxed)
    }

    pub fn count_message(&self) {
        self.messages_session.fetch_add(1, Ordering::Relaxed);
    }

    /// Append to history. Failures are logged and swallowed; chat keeps
    /// working without disk.
    pub fn persist(&self, record: &MessageRecord) {
        if let Err(e) = self.store.append(record) {
            tracing::warn!(nick = %record.nick, "Failed to persist message: {e}");
            self.oplog.error("PERSIST_FAIL", format!("{} {e}", record.nick));
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.farewell.get().is_some()
    }

    /// How the server is going down, once the sweep has started.
    pub fn farewell(&self) -> Option<Farewell> {
        self.farewell.get().copied()
    }

    /// Mark shutdown as started. Returns false if it already was; the first
    /// caller's farewell sticks.
    pub(crate) fn begin_shutdown(&self, farewell: Farewell) -> bool {
        self.farewell.set(farewell).is_ok()
    }
}

/// Stops a server started with [`Server::start`].
#[derive(Clone, Default)]
pub struct ShutdownTrigger {
    notify: Arc<Notify>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    async fn triggered(self) {
        self.notify.notified().await;
    }
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Build SharedState: validate the admin token, prepare the log
    /// directory, open the history store.
    pub fn build_state(&self) -> Result<Arc<SharedState>> {
        let admin_token = self.config.require_admin_token()?.to_string();

        std::fs::create_dir_all(&self.config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", self.config.log_dir.display())
        })?;

        match std::fs::remove_file(&self.config.restart_marker) {
            Ok(()) => tracing::info!("Removed stale restart marker"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.config.restart_marker.display(),
                "Failed to remove restart marker: {e}"
            ),
        }

        let store: Arc<dyn MessageStore> = match &self.config.db_path {
            Some(path) => {
                tracing::info!("Opening database: {}", path.display());
                Arc::new(
                    SqliteStore::open(path)
                        .map_err(|e| anyhow::anyhow!("Failed to open database: {e}"))?,
                )
            }
            None => Arc::new(FileStore::new(&self.config.log_dir)),
        };

        let filter = ModerationFilter::new(&self.config.forbidden_words);
        tracing::info!("Loaded {} forbidden patterns", filter.len());

        let oplog = OpLog::new(&self.config.log_dir);
        oplog.server("SERVER_START");

        Ok(Arc::new(SharedState {
            config: self.config.clone(),
            admin_token,
            registry: Registry::new(),
            filter,
            store,
            oplog,
            started: Instant::now(),
            messages_session: AtomicU64::new(0),
            next_conn: AtomicU64::new(1),
            farewell: OnceLock::new(),
        }))
    }

    /// Run until SIGINT/SIGTERM, then shut down gracefully.
    pub async fn run(self) -> Result<()> {
        let state = self.build_state()?;
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        tracing::info!("WebSocket listener on {}", listener.local_addr()?);
        serve(listener, state, shutdown::wait_for_signal()).await
    }

    /// Start the server and return the bound address, a shutdown trigger
    /// and the task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, ShutdownTrigger, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let state = self.build_state()?;
        let trigger = ShutdownTrigger::default();
        let handle = tokio::spawn(serve(listener, state, trigger.clone().triggered()));
        Ok((addr, trigger, handle))
    }
}

/// Serve until `signal` fires. The shutdown sweep runs before the listener
/// stops accepting.
async fn serve<F>(listener: TcpListener, state: Arc<SharedState>, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = web::router(Arc::clone(&state));
    let sweep_state = Arc::clone(&state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        signal.await;
        shutdown::sweep(&sweep_state).await;
    })
    .await
    .context("HTTP server error")?;

    state.oplog.server("SERVER_STOP");
    tracing::info!("Server stopped");
    Ok(())
}
