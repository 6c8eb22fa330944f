//! Graceful shutdown: signal wait and the notify-then-close sweep.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::broadcast::broadcast;
use crate::protocol;
use crate::registry::StopReason;
use crate::server::SharedState;
use crate::transport::CLOSE_GOING_AWAY;

/// Resolves on SIGINT or SIGTERM (Ctrl-C elsewhere).
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => tracing::info!("Received SIGINT - initiating graceful shutdown"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM - initiating graceful shutdown"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to install signal handlers, falling back to Ctrl-C: {e}");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl-C - initiating graceful shutdown");
}

/// Whether the process is stopping for good or restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Farewell {
    Shutdown,
    Restart,
}

impl Farewell {
    /// A restart if the marker file exists.
    pub fn detect(marker: &Path) -> Self {
        if marker.exists() { Self::Restart } else { Self::Shutdown }
    }

    /// `SYS` line sent to every client before its close frame.
    pub fn notice(self) -> String {
        protocol::sys(match self {
            Self::Shutdown => "Server shutting down",
            Self::Restart => "Server restarting",
        })
    }

    /// Close frame reason.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Shutdown => "Server shutdown",
            Self::Restart => "Server restart",
        }
    }

    fn event(self) -> &'static str {
        match self {
            Self::Shutdown => "SERVER_SHUTDOWN",
            Self::Restart => "SERVER_RESTART",
        }
    }
}

/// Notify every registered connection, then close each one with 1001.
///
/// Restart vs shutdown is decided once, from the marker file. The registry
/// is sealed first, so a handshake finishing mid-sweep is refused with the
/// same notice instead of joining. Each close is bounded by the configured
/// timeout; a timeout is logged and skipped.
pub async fn sweep(state: &Arc<SharedState>) {
    let farewell = Farewell::detect(&state.config.restart_marker);
    if !state.begin_shutdown(farewell) {
        return;
    }
    state.registry.seal();

    tracing::info!(?farewell, clients = state.registry.len(), "Sweeping connections");
    state.oplog.server(farewell.event());
    broadcast(state, &farewell.notice());

    let timeout = Duration::from_secs(state.config.shutdown_timeout_secs);
    let reason = farewell.reason();
    let mut closes = JoinSet::new();
    for (id, client) in state.registry.snapshot() {
        closes.spawn(async move {
            match tokio::time::timeout(timeout, client.handle.close(CLOSE_GOING_AWAY, reason)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(conn = %id, "Close on shutdown failed: {e}"),
                Err(_) => tracing::warn!(conn = %id, nick = %client.nick, "Close on shutdown timed out"),
            }
            client.handle.stop(StopReason::Shutdown);
        });
    }
    while closes.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::{Client, ClientHandle, ConnId};
    use crate::server::Server;
    use crate::transport::Outbound;

    fn state(dir: &std::path::Path) -> Arc<SharedState> {
        Server::new(ServerConfig {
            log_dir: dir.join("logs"),
            admin_token: Some("tok".into()),
            restart_marker: dir.join("restart"),
            shutdown_timeout_secs: 1,
            ..Default::default()
        })
        .build_state()
        .unwrap()
    }

    fn join(state: &SharedState, id: u64, nick: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(8);
        let (handle, _stop) = ClientHandle::new(tx);
        state
            .registry
            .register(
                ConnId(id),
                Client {
                    nick: nick.into(),
                    peer: "127.0.0.1:1".into(),
                    handle,
                },
            )
            .unwrap();
        rx
    }

    /// Acks close frames and returns everything it saw.
    fn drain(mut rx: mpsc::Receiver<Outbound>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(msg) = rx.recv().await {
                match msg {
                    Outbound::Line(l) => seen.push(l),
                    Outbound::Close { code, reason, ack } => {
                        seen.push(format!("CLOSE {code} {reason}"));
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        break;
                    }
                }
            }
            seen
        })
    }

    #[tokio::test]
    async fn notice_precedes_close() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let alice = drain(join(&state, 1, "alice"));
        let bob = drain(join(&state, 2, "bob"));

        sweep(&state).await;

        for seen in [alice.await.unwrap(), bob.await.unwrap()] {
            assert_eq!(seen, ["SYS Server shutting down", "CLOSE 1001 Server shutdown"]);
        }
        assert!(state.is_shutting_down());
    }

    #[tokio::test]
    async fn restart_marker_changes_notice() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        std::fs::write(dir.path().join("restart"), b"").unwrap();
        let alice = drain(join(&state, 1, "alice"));

        sweep(&state).await;

        assert_eq!(
            alice.await.unwrap(),
            ["SYS Server restarting", "CLOSE 1001 Server restart"]
        );
    }

    #[tokio::test]
    async fn unresponsive_connection_does_not_stall_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        // Nobody reads this queue, so the close is never acknowledged.
        let _stuck = join(&state, 1, "stuck");

        tokio::time::timeout(Duration::from_secs(5), sweep(&state))
            .await
            .expect("sweep finished");
    }
}
