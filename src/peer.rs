//! Peer registry: peer id -> peer record (transport handle, display name,
//! current room, activity tracking, per-counterparty ICE queue).
//!
//! Grounded in `the9ines-localbolt`'s `RoomManager`/`PeerInfo` (a `DashMap`
//! keyed by a stable id, each member holding an
//! `mpsc::UnboundedSender<ServerMessage>` as its transport handle) and
//! generalized from a single flat list into per-peer records with their own
//! liveness and ICE-queueing state, per the room/peer split this relay's
//! domain calls for.

use std::collections::HashMap;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerMessage;
use crate::room::RoomRegistry;

/// Channel used to push frames to a connected peer's transport write task.
pub type PeerSender = mpsc::UnboundedSender<ServerMessage>;

/// A close request for a specific peer's transport, carrying the WebSocket
/// close code the transport adapter should send (§4.7 normal-closure code
/// on eviction, §4.9 code 1001 on graceful shutdown).
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

pub type CloseSender = mpsc::UnboundedSender<CloseFrame>;
pub type CloseReceiver = mpsc::UnboundedReceiver<CloseFrame>;

/// RFC 6455 normal closure, used when the heartbeat/stale sweeps evict an
/// unresponsive peer (§4.7) and when a peer's own transport closes normally.
pub const CLOSE_NORMAL: u16 = 1000;

/// RFC 6455 "going away", used on graceful server shutdown (§4.9/S6).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Observable transport lifecycle state (§4.3). `Open` is the only state in
/// which `sendTo` succeeds; the registry transitions a record to `Closed`
/// just before tearing it down so any send racing the teardown fails safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    Closing,
    Closed,
}

pub struct PeerRecord {
    pub id: String,
    pub sender: PeerSender,
    pub state: TransportState,
    pub name: String,
    pub room_id: Option<String>,
    /// The room this record occupied immediately before its transport
    /// closed, retained only while `state == Closed` so a same-identity
    /// rejoin within the reconnect grace window can be adopted (§9). Set by
    /// `disconnect`, cleared once the room is rejoined (either by adoption
    /// or by `purge` deleting the record outright).
    pub last_room_id: Option<String>,
    pub last_activity: Instant,
    pub alive: bool,
    /// Candidates received for this peer from a counterparty before that
    /// counterparty's remote description was ready, keyed by sender id.
    pub ice_queue: HashMap<String, Vec<Value>>,
    /// Carries an explicit close code/reason to the connection task so a
    /// supervisor-initiated eviction or a graceful shutdown closes the
    /// transport with the correct WebSocket close code instead of merely
    /// deleting registry state.
    pub close_tx: CloseSender,
}

/// Snapshot of a peer record's client-visible fields, used for `/stats`.
pub struct PeerSnapshot {
    pub id: String,
    pub name: String,
    pub room_id: Option<String>,
    pub last_activity: Instant,
}

const MAX_NAME_CODEPOINTS: usize = 50;

/// Truncate a display name to the 50-code-point limit (§4.6 `join`).
pub fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_CODEPOINTS).collect()
}

pub struct PeerRegistry {
    peers: DashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Register a freshly connected transport under a freshly minted id.
    /// Returns the close-request receiver the connection task must select
    /// on alongside its read loop, so a supervisor-initiated eviction or a
    /// graceful shutdown can close the transport with a specific code.
    pub fn create(&self, id: String, sender: PeerSender, name: String) -> CloseReceiver {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        self.peers.insert(
            id.clone(),
            PeerRecord {
                id,
                sender,
                state: TransportState::Open,
                name,
                room_id: None,
                last_room_id: None,
                last_activity: Instant::now(),
                alive: true,
                ice_queue: HashMap::new(),
                close_tx,
            },
        );
        close_rx
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Request that `id`'s transport be closed with the given WebSocket
    /// close code/reason. Best-effort: a peer that's already gone is a
    /// no-op. The request is queued even if the record is removed
    /// immediately afterward, since the channel outlives the sender.
    pub fn request_close(&self, id: &str, code: u16, reason: &str) {
        if let Some(p) = self.peers.get(id) {
            let _ = p.close_tx.send(CloseFrame {
                code,
                reason: reason.to_string(),
            });
        }
    }

    pub fn name_of(&self, id: &str) -> Option<String> {
        self.peers.get(id).map(|p| p.name.clone())
    }

    pub fn room_of(&self, id: &str) -> Option<String> {
        self.peers.get(id).and_then(|p| p.room_id.clone())
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.peers
            .get(id)
            .is_some_and(|p| p.state == TransportState::Open)
    }

    /// Mark a peer's transport as no longer accepting sends, without
    /// deleting the record (used by the heartbeat sweep just before close).
    pub fn mark_closing(&self, id: &str) {
        if let Some(mut p) = self.peers.get_mut(id) {
            p.state = TransportState::Closing;
        }
    }

    pub fn set_name(&self, id: &str, name: String) {
        if let Some(mut p) = self.peers.get_mut(id) {
            p.name = name;
        }
    }

    /// Record inbound activity; called by the router before every dispatch.
    /// Also marks the peer alive for the current heartbeat round: §4.7 is
    /// explicit that *any* inbound frame counts toward surviving a round,
    /// not just an explicit `pong`.
    pub fn update_activity(&self, id: &str) {
        if let Some(mut p) = self.peers.get_mut(id) {
            p.last_activity = Instant::now();
            p.alive = true;
        }
    }

    /// Mark a peer alive for the current heartbeat round (inbound frame or
    /// explicit `pong` both count, per §4.7).
    pub fn mark_alive(&self, id: &str) {
        if let Some(mut p) = self.peers.get_mut(id) {
            p.alive = true;
        }
    }

    /// Clear the `alive` flag on every peer at the start of a heartbeat round.
    pub fn clear_all_alive(&self) {
        for mut entry in self.peers.iter_mut() {
            entry.alive = false;
        }
    }

    /// Snapshot of every still-connected peer currently flagged `!alive`,
    /// for the heartbeat sweep's eviction pass. A peer already `Closed`
    /// (disconnected, awaiting either reconnection or grace-expiry) didn't
    /// "miss a ping" — it already left — so it's excluded here and reaped
    /// separately by `expired_closed`.
    pub fn not_alive(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|p| p.state != TransportState::Closed && !p.alive)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Snapshot of every non-`Closed` peer whose `last_activity` is older
    /// than `timeout`, for the stale sweep.
    pub fn stale_open(&self, timeout: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|p| p.state != TransportState::Closed && now.duration_since(p.last_activity) > timeout)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Snapshot of every `Closed` (already-disconnected) peer whose
    /// reconnect grace window has elapsed, for the stale sweep's final
    /// reap pass.
    pub fn expired_closed(&self, grace: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|p| p.state == TransportState::Closed && now.duration_since(p.last_activity) > grace)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Delete a `Closed` record outright once its reconnect grace window
    /// has expired. No broadcast: `peer-left` was already sent when the
    /// transport closed (`disconnect`), and the room membership was
    /// already released at that point too.
    pub fn purge(&self, id: &str) {
        self.peers.remove(id);
    }

    /// Every peer with an `open` transport, for broadcasting `ping` or
    /// `server-shutdown`.
    pub fn open_peer_ids(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|p| p.state == TransportState::Open)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn snapshot(&self, id: &str) -> Option<PeerSnapshot> {
        self.peers.get(id).map(|p| PeerSnapshot {
            id: p.id.clone(),
            name: p.name.clone(),
            room_id: p.room_id.clone(),
            last_activity: p.last_activity,
        })
    }

    pub fn all_snapshots(&self) -> Vec<PeerSnapshot> {
        self.peers
            .iter()
            .map(|p| PeerSnapshot {
                id: p.id.clone(),
                name: p.name.clone(),
                room_id: p.room_id.clone(),
                last_activity: p.last_activity,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    /// Join `room_id`, leaving any previously held room first (same
    /// departure semantics as an explicit `leave`). Returns the other room
    /// members present *before* this peer joined, so the caller can build a
    /// welcome roster.
    pub fn join_room(
        &self,
        rooms: &RoomRegistry,
        id: &str,
        room_id: &str,
    ) -> Result<Vec<String>, crate::error::RelayError> {
        let prior_room = self.peers.get(id).and_then(|p| p.room_id.clone());
        if let Some(prior) = &prior_room {
            if prior != room_id {
                self.leave_room(rooms, id);
            }
        }

        let others = rooms.others(room_id, id);
        rooms.join(room_id, id)?;

        if let Some(mut p) = self.peers.get_mut(id) {
            p.room_id = Some(room_id.to_string());
        }

        Ok(others)
    }

    /// Reconnection support (§9): if `old_id` names a `Closed` record whose
    /// `last_room_id` is `room_id` — i.e. it disconnected from exactly this
    /// room and hasn't yet been reaped by `expired_closed` — splice the
    /// connection that was provisionally registered under `new_id` into
    /// that older identity instead. Re-admits `old_id` into `room_id` under
    /// the normal capacity rules (it already left, so it is not exempt the
    /// way an existing member's re-join is); if the room is full the
    /// adoption is abandoned and the caller falls back to a fresh join
    /// under `new_id`. On success the new transport's sender replaces the
    /// stale one, the record is marked alive and open, and `new_id`'s
    /// throwaway record is discarded. Returns `true` if the adoption
    /// happened.
    pub fn adopt(&self, rooms: &RoomRegistry, old_id: &str, new_id: &str, room_id: &str) -> bool {
        let eligible = self.peers.get(old_id).is_some_and(|p| {
            p.state == TransportState::Closed && p.last_room_id.as_deref() == Some(room_id)
        });
        if !eligible {
            return false;
        }

        if rooms.join(room_id, old_id).is_err() {
            return false;
        }

        let Some((_, new_record)) = self.peers.remove(new_id) else {
            rooms.leave(room_id, old_id);
            return false;
        };
        if let Some(mut old) = self.peers.get_mut(old_id) {
            old.sender = new_record.sender;
            old.state = TransportState::Open;
            old.alive = true;
            old.last_activity = Instant::now();
            old.room_id = Some(room_id.to_string());
            old.last_room_id = None;
        }
        true
    }

    /// Leave the current room, if any (§4.3 `leaveRoom`).
    pub fn leave_room(&self, rooms: &RoomRegistry, id: &str) {
        let room_id = match self.peers.get_mut(id) {
            Some(mut p) => p.room_id.take(),
            None => None,
        };
        if let Some(room_id) = room_id {
            rooms.leave(&room_id, id);
        }
    }

    /// Delete the peer record (and, if it was in a room, remove it from
    /// that room first). Returns the prior record's room id and name so the
    /// caller can broadcast `peer-left`.
    pub fn remove(&self, rooms: &RoomRegistry, id: &str) -> Option<(Option<String>, String)> {
        self.leave_room(rooms, id);
        self.peers
            .remove(id)
            .map(|(_, record)| (record.room_id, record.name))
    }

    /// Transition a peer's record to `Closed` on an ordinary transport
    /// close or a liveness eviction, releasing its room membership exactly
    /// like `remove` — but, unlike `remove`, keeping the record itself
    /// around (stamped with `last_room_id`) so a same-identity rejoin
    /// within `reconnect.grace` can be spliced back in by `adopt` (§9). The
    /// record is only fully deleted later, by `purge`, once that window
    /// elapses without a reconnect.
    ///
    /// Idempotent: called on an already-`Closed` record (e.g. a supervisor
    /// eviction runs this, then the connection task's own teardown runs it
    /// again once it observes the close request) is a no-op that returns
    /// `None`, so callers never broadcast `peer-left` twice for one peer.
    pub fn disconnect(&self, rooms: &RoomRegistry, id: &str) -> Option<(Option<String>, String)> {
        let (room_id, name) = {
            let mut p = self.peers.get_mut(id)?;
            if p.state == TransportState::Closed {
                return None;
            }
            let room_id = p.room_id.take();
            let name = p.name.clone();
            p.state = TransportState::Closed;
            p.last_room_id = room_id.clone();
            p.last_activity = Instant::now();
            (room_id, name)
        };
        if let Some(room_id) = &room_id {
            rooms.leave(room_id, id);
        }
        Some((room_id, name))
    }

    /// Send `msg` to `id` if its transport is open. Best-effort: a failed
    /// send (receiver dropped) is treated as `false`, never retried.
    pub fn send_to(&self, id: &str, msg: ServerMessage) -> bool {
        match self.peers.get(id) {
            Some(p) if p.state == TransportState::Open => p.sender.send(msg).is_ok(),
            _ => false,
        }
    }

    /// Fan out `msg` to every other member of `room_id`.
    pub fn broadcast(&self, rooms: &RoomRegistry, room_id: &str, except_peer_id: &str, msg: ServerMessage) {
        for other in rooms.others(room_id, except_peer_id) {
            if !self.send_to(&other, msg.clone()) {
                debug!(peer_id = %other, "broadcast send failed, receiver gone");
            }
        }
    }

    /// Append a candidate to `recipient_id`'s queue for candidates
    /// originating from `from_id`.
    pub fn queue_ice(&self, recipient_id: &str, from_id: &str, candidate: Value) {
        if let Some(mut p) = self.peers.get_mut(recipient_id) {
            p.ice_queue
                .entry(from_id.to_string())
                .or_default()
                .push(candidate);
        }
    }

    /// Atomically take and clear `recipient_id`'s queued candidates from
    /// `from_id`. Idempotent: draining an empty or absent queue returns an
    /// empty vec, so dual drain triggers (on `answer` and on
    /// `ready-for-candidates`) are always safe.
    pub fn drain_ice(&self, recipient_id: &str, from_id: &str) -> Vec<Value> {
        match self.peers.get_mut(recipient_id) {
            Some(mut p) => p.ice_queue.remove(from_id).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (PeerSender, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn create_and_lookup() {
        let reg = PeerRegistry::new();
        let (tx, _rx) = sender();
        reg.create("peer_a".into(), tx, "Alice".into());
        assert!(reg.contains("peer_a"));
        assert_eq!(reg.name_of("peer_a"), Some("Alice".into()));
        assert!(reg.is_open("peer_a"));
    }

    #[test]
    fn join_room_returns_existing_members_and_broadcasts_target() {
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx_a, _rx_a) = sender();
        let (tx_b, mut rx_b) = sender();
        peers.create("peer_a".into(), tx_a, "Alice".into());
        peers.create("peer_b".into(), tx_b, "Bob".into());

        let others_a = peers.join_room(&rooms, "peer_a", "ROOM01").unwrap();
        assert!(others_a.is_empty());

        let others_b = peers.join_room(&rooms, "peer_b", "ROOM01").unwrap();
        assert_eq!(others_b, vec!["peer_a".to_string()]);

        peers.broadcast(
            &rooms,
            "ROOM01",
            "peer_b",
            ServerMessage::PeerJoined {
                peer: crate::protocol::PeerSummary {
                    id: "peer_b".into(),
                    name: "Bob".into(),
                },
            },
        );
        let received = rx_b.try_recv();
        assert!(received.is_err(), "peer_b should not receive its own broadcast");
    }

    #[test]
    fn switching_rooms_leaves_the_prior_room() {
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx, _rx) = sender();
        peers.create("peer_a".into(), tx, "Alice".into());

        peers.join_room(&rooms, "peer_a", "ROOM01").unwrap();
        assert!(rooms.exists("ROOM01"));

        peers.join_room(&rooms, "peer_a", "ROOM02").unwrap();
        assert!(!rooms.exists("ROOM01"));
        assert!(rooms.exists("ROOM02"));
    }

    #[test]
    fn ice_queue_drain_is_idempotent() {
        let peers = PeerRegistry::new();
        let (tx, _rx) = sender();
        peers.create("peer_a".into(), tx, "Alice".into());

        peers.queue_ice("peer_a", "peer_b", serde_json::json!({"candidate": "c1"}));
        peers.queue_ice("peer_a", "peer_b", serde_json::json!({"candidate": "c2"}));

        let drained = peers.drain_ice("peer_a", "peer_b");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0]["candidate"], "c1");

        // re-draining an emptied queue is a safe no-op
        assert!(peers.drain_ice("peer_a", "peer_b").is_empty());
    }

    #[test]
    fn remove_clears_room_membership_and_returns_prior_state() {
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx, _rx) = sender();
        peers.create("peer_a".into(), tx, "Alice".into());
        peers.join_room(&rooms, "peer_a", "ROOM01").unwrap();

        let prior = peers.remove(&rooms, "peer_a").unwrap();
        assert_eq!(prior.0, Some("ROOM01".to_string()));
        assert_eq!(prior.1, "Alice");
        assert!(!rooms.exists("ROOM01"));
        assert!(!peers.contains("peer_a"));
    }

    #[test]
    fn adopt_splices_new_transport_into_a_really_disconnected_identity() {
        // Reaches adopt's precondition the way production code actually
        // does: a real `disconnect` (as run on transport close / eviction),
        // not a manually-forced state.
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx_old, rx_old) = sender();
        peers.create("peer_old".into(), tx_old, "Alice".into());
        peers.join_room(&rooms, "peer_old", "ROOM01").unwrap();
        drop(rx_old);

        let prior = peers.disconnect(&rooms, "peer_old").unwrap();
        assert_eq!(prior.0, Some("ROOM01".to_string()));
        // disconnect already released room membership; the room is empty.
        assert!(!rooms.exists("ROOM01"));

        let (tx_new, mut rx_new) = sender();
        peers.create("peer_new".into(), tx_new, "Alice".into());

        assert!(peers.adopt(&rooms, "peer_old", "peer_new", "ROOM01"));
        assert!(!peers.contains("peer_new"));
        assert!(peers.is_open("peer_old"));
        assert!(rooms.members("ROOM01").contains(&"peer_old".to_string()));
        assert!(peers.send_to(
            "peer_old",
            ServerMessage::Left {
                room_id: "ROOM01".into()
            }
        ));
        assert!(rx_new.try_recv().is_err());
    }

    #[test]
    fn adopt_refuses_when_old_transport_still_open() {
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx_old, _rx_old) = sender();
        peers.create("peer_old".into(), tx_old, "Alice".into());
        peers.join_room(&rooms, "peer_old", "ROOM01").unwrap();

        let (tx_new, _rx_new) = sender();
        peers.create("peer_new".into(), tx_new, "Alice".into());

        assert!(!peers.adopt(&rooms, "peer_old", "peer_new", "ROOM01"));
        assert!(peers.contains("peer_new"));
    }

    #[test]
    fn adopt_refuses_wrong_room_and_leaves_both_records_intact() {
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx_old, _rx_old) = sender();
        peers.create("peer_old".into(), tx_old, "Alice".into());
        peers.join_room(&rooms, "peer_old", "ROOM01").unwrap();
        peers.disconnect(&rooms, "peer_old");

        let (tx_new, _rx_new) = sender();
        peers.create("peer_new".into(), tx_new, "Alice".into());

        assert!(!peers.adopt(&rooms, "peer_old", "peer_new", "ROOM02"));
        assert!(peers.contains("peer_old"));
        assert!(peers.contains("peer_new"));
    }

    #[test]
    fn disconnect_is_idempotent_and_broadcasts_only_once() {
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx, _rx) = sender();
        peers.create("peer_a".into(), tx, "Alice".into());
        peers.join_room(&rooms, "peer_a", "ROOM01").unwrap();

        let first = peers.disconnect(&rooms, "peer_a");
        assert_eq!(first.unwrap().0, Some("ROOM01".to_string()));
        // a second disconnect (e.g. the connection task's own teardown
        // running after a supervisor eviction already did) is a no-op
        assert!(peers.disconnect(&rooms, "peer_a").is_none());
    }

    #[test]
    fn expired_closed_and_purge_reap_an_unreconnected_ghost() {
        let peers = PeerRegistry::new();
        let rooms = RoomRegistry::new(100, 10);
        let (tx, _rx) = sender();
        peers.create("peer_a".into(), tx, "Alice".into());
        peers.join_room(&rooms, "peer_a", "ROOM01").unwrap();
        peers.disconnect(&rooms, "peer_a");

        assert!(peers.expired_closed(std::time::Duration::from_secs(0)).contains(&"peer_a".to_string()));
        assert!(peers.not_alive().is_empty(), "a Closed ghost never counts as a missed heartbeat");

        peers.purge("peer_a");
        assert!(!peers.contains("peer_a"));
    }

    #[test]
    fn request_close_delivers_code_to_the_peers_close_channel() {
        let peers = PeerRegistry::new();
        let (tx, _rx) = sender();
        let mut close_rx = peers.create("peer_a".into(), tx, "Alice".into());

        peers.request_close("peer_a", CLOSE_GOING_AWAY, "server shutting down");
        let received = close_rx.try_recv().unwrap();
        assert_eq!(received.code, CLOSE_GOING_AWAY);
        assert_eq!(received.reason, "server shutting down");
    }

    #[test]
    fn request_close_on_unknown_peer_is_noop() {
        let peers = PeerRegistry::new();
        peers.request_close("peer_ghost", CLOSE_NORMAL, "evicted");
    }

    #[test]
    fn update_activity_marks_alive_like_pong_does() {
        let peers = PeerRegistry::new();
        let (tx, _rx) = sender();
        peers.create("peer_a".into(), tx, "Alice".into());
        peers.clear_all_alive();
        assert!(peers.not_alive().contains(&"peer_a".to_string()));

        peers.update_activity("peer_a");
        assert!(!peers.not_alive().contains(&"peer_a".to_string()));
    }

    #[test]
    fn send_to_closed_transport_returns_false() {
        let peers = PeerRegistry::new();
        let (tx, rx) = sender();
        peers.create("peer_a".into(), tx, "Alice".into());
        drop(rx);
        assert!(!peers.send_to("peer_a", ServerMessage::Left { room_id: "x".into() }));
    }
}
