//! Message router (§4.5): decodes a frame, updates activity, dispatches by
//! message type to the matching handler, and converts handler errors into
//! the uniform `error` envelope. Dispatch is a plain `match` over the
//! `ClientMessage` sum type rather than a string-keyed table, per the
//! design note in spec §9 favoring tagged enums in a typed target.

use crate::handlers;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::state::AppState;

/// Result of routing one inbound frame: the response to send back to the
/// requester (if any), and — only set when a `join` spliced the connection
/// into a reconnected identity — the id the caller's connection loop must
/// use for this peer from now on.
pub struct RouteOutcome {
    pub response: Option<ServerMessage>,
    pub adopted_peer_id: Option<String>,
}

impl RouteOutcome {
    fn response(msg: ServerMessage) -> Self {
        Self {
            response: Some(msg),
            adopted_peer_id: None,
        }
    }

    fn none() -> Self {
        Self {
            response: None,
            adopted_peer_id: None,
        }
    }
}

/// Decode `text` and dispatch it for `peer_id`. Never returns an error:
/// protocol/handler failures are folded into an `error` response frame so
/// the connection always stays open (§4.4/§4.5/§7).
pub fn route(state: &AppState, peer_id: &str, text: &str) -> RouteOutcome {
    state.peers.update_activity(peer_id);

    let message = match protocol::decode(text) {
        Ok(message) => message,
        Err(err) => return RouteOutcome::response(ServerMessage::Error { error: err.wire_message() }),
    };

    dispatch(state, peer_id, message)
}

fn dispatch(state: &AppState, peer_id: &str, message: ClientMessage) -> RouteOutcome {
    let result = match message {
        ClientMessage::Join {
            room_id,
            name,
            peer_id: client_peer_id,
        } => match handlers::join(state, peer_id, &room_id, name, client_peer_id) {
            Ok(outcome) => {
                return RouteOutcome {
                    response: Some(outcome.response),
                    adopted_peer_id: outcome.adopted_peer_id,
                };
            }
            Err(err) => Err(err),
        },

        ClientMessage::Leave {} => handlers::leave(state, peer_id),

        ClientMessage::Offer { target_peer_id, sdp } => {
            handlers::offer(state, peer_id, &target_peer_id, sdp)
        }

        ClientMessage::Answer { target_peer_id, sdp } => {
            handlers::answer(state, peer_id, &target_peer_id, sdp)
        }

        ClientMessage::IceCandidate {
            target_peer_id,
            candidate,
        } => handlers::ice_candidate(state, peer_id, &target_peer_id, candidate),

        ClientMessage::ReadyForCandidates { target_peer_id } => {
            handlers::ready_for_candidates(state, peer_id, &target_peer_id)
        }

        ClientMessage::FileRequest {
            target_peer_id,
            file_info,
        } => handlers::file_request(state, peer_id, &target_peer_id, file_info),

        ClientMessage::FileAccept {
            target_peer_id,
            file_info,
        } => handlers::file_accept(state, peer_id, &target_peer_id, file_info),

        ClientMessage::FileReject {
            target_peer_id,
            reason,
        } => handlers::file_reject(state, peer_id, &target_peer_id, reason),

        ClientMessage::Ping { .. } => handlers::ping(state, peer_id),

        ClientMessage::Pong { .. } => handlers::pong(state, peer_id),
    };

    match result {
        Ok(Some(response)) => RouteOutcome::response(response),
        Ok(None) => RouteOutcome::none(),
        Err(err) => RouteOutcome::response(ServerMessage::Error {
            error: err.wire_message(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::sync::mpsc;

    fn state() -> AppState {
        AppState::new(Config::default())
    }

    fn add_peer(state: &AppState, id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.peers.create(id.to_string(), tx, "Anonymous".to_string());
        rx
    }

    #[test]
    fn route_rejects_invalid_json_without_closing() {
        let state = state();
        let _rx = add_peer(&state, "peer_x");
        let outcome = route(&state, "peer_x", "not json");
        match outcome.response {
            Some(ServerMessage::Error { error }) => assert_eq!(error, "Invalid JSON"),
            _ => panic!("expected error response"),
        }
    }

    #[test]
    fn route_rejects_unknown_type() {
        let state = state();
        let _rx = add_peer(&state, "peer_x");
        let outcome = route(&state, "peer_x", r#"{"type":"frobnicate"}"#);
        match outcome.response {
            Some(ServerMessage::Error { error }) => {
                assert_eq!(error, "Unknown message type: frobnicate")
            }
            _ => panic!("expected error response"),
        }
    }

    #[test]
    fn route_dispatches_join_and_updates_activity() {
        let state = state();
        let _rx = add_peer(&state, "peer_x");
        let before = state.peers.snapshot("peer_x").unwrap().last_activity;
        std::thread::sleep(std::time::Duration::from_millis(2));
        let outcome = route(&state, "peer_x", r#"{"type":"join","roomId":"ROOM01"}"#);
        assert!(matches!(outcome.response, Some(ServerMessage::Joined { .. })));
        let after = state.peers.snapshot("peer_x").unwrap().last_activity;
        assert!(after > before);
    }

    #[test]
    fn route_converts_handler_error_to_error_envelope() {
        let state = state();
        let _rx = add_peer(&state, "peer_x");
        let outcome = route(&state, "peer_x", r#"{"type":"leave"}"#);
        match outcome.response {
            Some(ServerMessage::Error { error }) => assert_eq!(error, "Not in a room"),
            _ => panic!("expected error response"),
        }
    }
}
