//! Liveness supervisor (§4.7): two independent periodic sweeps — heartbeat
//! (mark-and-ping) and staleness (no-activity eviction) — plus the
//! graceful-shutdown coordination that stops them (§4.9).
//!
//! Grounded in the teacher's task-per-connection `tokio::spawn` style
//! (`lib.rs::run`), generalized to two long-lived background tasks that
//! share `AppState` instead of one task per connection.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::handlers::evict;
use crate::protocol::DepartureReason;
use crate::state::AppState;

/// Run the heartbeat sweep until `shutdown` fires. Every round: evict
/// whoever didn't answer the previous round's ping, clear every remaining
/// peer's `alive` flag, then ping everyone with an open transport.
pub async fn heartbeat_task(state: Arc<AppState>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(state.config.heartbeat_interval());
    interval.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => break,
        }

        let missed = state.peers.not_alive();
        for peer_id in &missed {
            info!(peer_id = %peer_id, "heartbeat miss, evicting");
            evict(&state, peer_id, DepartureReason::Timeout);
        }

        state.peers.clear_all_alive();

        let now_ms = crate::clock::epoch_millis();
        for peer_id in state.peers.open_peer_ids() {
            state.peers.send_to(
                &peer_id,
                crate::protocol::ServerMessage::Ping { timestamp: now_ms },
            );
        }
    }
}

/// Run the staleness sweep until `shutdown` fires: evict any still-connected
/// peer whose `lastActivity` is older than `cleanup.peerTimeout`, then purge
/// any already-`Closed` ghost (§9 reconnection) whose `reconnect.grace`
/// window has elapsed without a rejoin.
pub async fn stale_task(state: Arc<AppState>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(state.config.cleanup_interval());
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => break,
        }

        let timeout = state.config.cleanup_peer_timeout();
        for peer_id in state.peers.stale_open(timeout) {
            info!(peer_id = %peer_id, "inactivity timeout, evicting");
            evict(&state, &peer_id, DepartureReason::Stale);
        }

        let grace = state.config.reconnect_grace();
        for peer_id in state.peers.expired_closed(grace) {
            debug!(peer_id = %peer_id, "reconnect grace expired, purging");
            state.peers.purge(&peer_id);
        }
    }
}
