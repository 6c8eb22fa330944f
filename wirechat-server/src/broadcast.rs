//! Fan-out of one line to every registered connection.
//!
//! Delivery is `try_send` onto each connection's outbound queue, over a
//! snapshot of the registry. A connection whose queue is full or closed is
//! skipped, then evicted once the sweep is done and asked to stop.

use crate::registry::{ConnId, StopReason};
use crate::server::SharedState;

/// Send `line` to every registered connection. Returns how many queues
/// accepted it.
pub fn broadcast(state: &SharedState, line: &str) -> usize {
    broadcast_except(state, None, line)
}

/// Like [`broadcast`], skipping `skip`.
pub fn broadcast_except(state: &SharedState, skip: Option<ConnId>, line: &str) -> usize {
    let targets = state.registry.snapshot();
    let mut delivered = 0;
    let mut failed = Vec::new();

    for (id, client) in &targets {
        if Some(*id) == skip {
            continue;
        }
        match client.handle.try_send(line) {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(conn = %id, nick = %client.nick, "Broadcast send failed: {e}");
                failed.push(*id);
            }
        }
    }

    if !failed.is_empty() {
        for client in state.registry.evict(&failed) {
            state
                .oplog
                .error("BROADCAST_FAIL", format!("{} {}", client.nick, client.peer));
            client.handle.stop(StopReason::SendFailed);
        }
    }
    delivered
}
