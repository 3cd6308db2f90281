//! Signaling handler contracts (§4.6): one function per `ClientMessage`
//! variant, each `(peer, payload) -> response|none` with side effects on
//! other peers expressed as direct registry calls. The router (see
//! `router.rs`) is the only caller; it owns `updateActivity` and the
//! uniform error-envelope conversion.

use serde_json::Value;

use crate::clock::epoch_millis;
use crate::error::RelayError;
use crate::id::{is_valid_peer_id, is_valid_room_id};
use crate::peer::truncate_name;
use crate::protocol::{DepartureReason, PeerSummary, ServerMessage};
use crate::state::AppState;

/// Outcome of `join`: the response to send back, and — only when a
/// client-supplied `peerId` caused a reconnection splice — the id the
/// caller's connection task must use for all further routing.
pub struct JoinOutcome {
    pub response: ServerMessage,
    pub adopted_peer_id: Option<String>,
}

pub fn join(
    state: &AppState,
    peer_id: &str,
    room_id: &str,
    name: Option<String>,
    client_peer_id: Option<String>,
) -> Result<JoinOutcome, RelayError> {
    if !is_valid_room_id(room_id) {
        return Err(RelayError::BadRequest("Invalid room id".to_string()));
    }

    // Reconnection (§9): a client-supplied id naming a stale member of this
    // room takes over that identity instead of joining fresh. Resolved
    // *before* applying `name`, so a supplied name always lands on whichever
    // record survives — adopting `old_id` discards `peer_id`'s throwaway
    // record outright, so naming it first would silently lose the name.
    let mut effective_id = peer_id.to_string();
    let mut reconnected = false;
    if let Some(old_id) = client_peer_id.filter(|id| is_valid_peer_id(id) && id != peer_id) {
        if state.peers.adopt(&state.rooms, &old_id, peer_id, room_id) {
            effective_id = old_id;
            reconnected = true;
        }
    }

    if let Some(name) = name {
        state.peers.set_name(&effective_id, truncate_name(&name));
    }

    let others = if reconnected {
        state.rooms.others(room_id, &effective_id)
    } else {
        state.peers.join_room(&state.rooms, &effective_id, room_id)?
    };

    let name = state.peers.name_of(&effective_id).unwrap_or_default();
    let roster: Vec<PeerSummary> = others
        .iter()
        .filter_map(|id| {
            state.peers.name_of(id).map(|name| PeerSummary {
                id: id.clone(),
                name,
            })
        })
        .collect();

    let summary = PeerSummary {
        id: effective_id.clone(),
        name,
    };
    let broadcast_msg = if reconnected {
        ServerMessage::PeerReconnected {
            peer: summary.clone(),
        }
    } else {
        ServerMessage::PeerJoined {
            peer: summary.clone(),
        }
    };
    state
        .peers
        .broadcast(&state.rooms, room_id, &effective_id, broadcast_msg);

    let response = ServerMessage::Joined {
        room_id: room_id.to_string(),
        peer_id: effective_id.clone(),
        peers: roster,
        is_reconnection: reconnected.then_some(true),
    };

    Ok(JoinOutcome {
        response,
        adopted_peer_id: reconnected.then_some(effective_id),
    })
}

pub fn leave(state: &AppState, peer_id: &str) -> Result<Option<ServerMessage>, RelayError> {
    let room_id = state
        .peers
        .room_of(peer_id)
        .ok_or(RelayError::NotInRoom)?;

    state.peers.leave_room(&state.rooms, peer_id);
    state.peers.broadcast(
        &state.rooms,
        &room_id,
        peer_id,
        ServerMessage::PeerLeft {
            peer_id: peer_id.to_string(),
            reason: None,
        },
    );

    Ok(Some(ServerMessage::Left { room_id }))
}

pub fn offer(
    state: &AppState,
    peer_id: &str,
    target_peer_id: &str,
    sdp: Value,
) -> Result<Option<ServerMessage>, RelayError> {
    if !state.peers.contains(target_peer_id) {
        return Err(RelayError::TargetNotFound);
    }
    let name = state.peers.name_of(peer_id).unwrap_or_default();
    state.peers.send_to(
        target_peer_id,
        ServerMessage::Offer {
            from_peer_id: peer_id.to_string(),
            from_peer_name: name,
            sdp,
        },
    );
    Ok(None)
}

pub fn answer(
    state: &AppState,
    peer_id: &str,
    target_peer_id: &str,
    sdp: Value,
) -> Result<Option<ServerMessage>, RelayError> {
    if !state.peers.contains(target_peer_id) {
        return Err(RelayError::TargetNotFound);
    }
    state.peers.send_to(
        target_peer_id,
        ServerMessage::Answer {
            from_peer_id: peer_id.to_string(),
            sdp,
        },
    );

    // ICE flush: the answerer may have queued candidates from the target
    // while waiting for its remote description; deliver them now.
    for candidate in state.peers.drain_ice(peer_id, target_peer_id) {
        state.peers.send_to(
            peer_id,
            ServerMessage::IceCandidate {
                from_peer_id: target_peer_id.to_string(),
                candidate,
            },
        );
    }

    Ok(None)
}

pub fn ice_candidate(
    state: &AppState,
    peer_id: &str,
    target_peer_id: &str,
    candidate: Value,
) -> Result<Option<ServerMessage>, RelayError> {
    if !state.peers.contains(target_peer_id) {
        return Err(RelayError::TargetNotFound);
    }
    let delivered = state.peers.send_to(
        target_peer_id,
        ServerMessage::IceCandidate {
            from_peer_id: peer_id.to_string(),
            candidate: candidate.clone(),
        },
    );
    if !delivered {
        state.peers.queue_ice(target_peer_id, peer_id, candidate);
    }
    Ok(None)
}

pub fn ready_for_candidates(
    state: &AppState,
    peer_id: &str,
    target_peer_id: &str,
) -> Result<Option<ServerMessage>, RelayError> {
    for candidate in state.peers.drain_ice(peer_id, target_peer_id) {
        state.peers.send_to(
            peer_id,
            ServerMessage::IceCandidate {
                from_peer_id: target_peer_id.to_string(),
                candidate,
            },
        );
    }
    Ok(None)
}

pub fn file_request(
    state: &AppState,
    peer_id: &str,
    target_peer_id: &str,
    file_info: Option<Value>,
) -> Result<Option<ServerMessage>, RelayError> {
    if !state.peers.contains(target_peer_id) {
        return Err(RelayError::TargetNotFound);
    }
    let name = state.peers.name_of(peer_id).unwrap_or_default();
    state.peers.send_to(
        target_peer_id,
        ServerMessage::FileRequest {
            from_peer_id: peer_id.to_string(),
            from_peer_name: name,
            file_info,
        },
    );
    Ok(None)
}

pub fn file_accept(
    state: &AppState,
    peer_id: &str,
    target_peer_id: &str,
    file_info: Option<Value>,
) -> Result<Option<ServerMessage>, RelayError> {
    if !state.peers.contains(target_peer_id) {
        return Err(RelayError::TargetNotFound);
    }
    state.peers.send_to(
        target_peer_id,
        ServerMessage::FileAccept {
            from_peer_id: peer_id.to_string(),
            file_info,
        },
    );
    Ok(None)
}

pub fn file_reject(
    state: &AppState,
    peer_id: &str,
    target_peer_id: &str,
    reason: Option<String>,
) -> Result<Option<ServerMessage>, RelayError> {
    if !state.peers.contains(target_peer_id) {
        return Err(RelayError::TargetNotFound);
    }
    state.peers.send_to(
        target_peer_id,
        ServerMessage::FileReject {
            from_peer_id: peer_id.to_string(),
            reason,
        },
    );
    Ok(None)
}

pub fn ping(_state: &AppState, _peer_id: &str) -> Result<Option<ServerMessage>, RelayError> {
    Ok(Some(ServerMessage::Pong {
        timestamp: epoch_millis(),
    }))
}

pub fn pong(state: &AppState, peer_id: &str) -> Result<Option<ServerMessage>, RelayError> {
    state.peers.mark_alive(peer_id);
    Ok(None)
}

/// Evict a peer with the given departure reason, broadcasting `peer-left`
/// to its former roommates (§4.7 heartbeat/stale sweeps). The transport is
/// asked to close with a normal-closure code; the record itself is only
/// marked `Closed` (not deleted) so the same peer id can be adopted back in
/// if it reconnects within `reconnect.grace` (§9) — the connection task's
/// own teardown, and the grace-expiry reap, both tolerate running
/// `disconnect` again on a record this already closed.
pub fn evict(state: &AppState, peer_id: &str, reason: DepartureReason) {
    state
        .peers
        .request_close(peer_id, crate::peer::CLOSE_NORMAL, "evicted");
    if let Some((room_id, _name)) = state.peers.disconnect(&state.rooms, peer_id) {
        if let Some(room_id) = room_id {
            state.peers.broadcast(
                &state.rooms,
                &room_id,
                peer_id,
                ServerMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                    reason: Some(reason),
                },
            );
        }
    }
}
