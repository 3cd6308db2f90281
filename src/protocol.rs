//! Wire message types for the signaling relay.
//!
//! All messages are JSON objects with a `type` discriminator, serialized via
//! serde with `#[serde(tag = "type")]`. `sdp`, `candidate`, and `fileInfo`
//! payloads are kept as opaque `serde_json::Value` so the server never
//! inspects or constrains them, and so unknown nested fields survive a
//! relay round-trip untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a peer sends to the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(default)]
        name: Option<String>,
        /// Client-supplied peer id for reconnection (see §9). Ignored
        /// unless it names an existing, transport-closed peer in the
        /// target room.
        #[serde(default, rename = "peerId")]
        peer_id: Option<String>,
    },

    #[serde(rename = "leave")]
    Leave {},

    #[serde(rename = "offer")]
    Offer {
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        sdp: Value,
    },

    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        sdp: Value,
    },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        candidate: Value,
    },

    #[serde(rename = "ready-for-candidates")]
    ReadyForCandidates {
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
    },

    #[serde(rename = "file-request")]
    FileRequest {
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        #[serde(default, rename = "fileInfo")]
        file_info: Option<Value>,
    },

    #[serde(rename = "file-accept")]
    FileAccept {
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        #[serde(default, rename = "fileInfo")]
        file_info: Option<Value>,
    },

    #[serde(rename = "file-reject")]
    FileReject {
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },

    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

/// A peer's public identity as seen by roommates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: String,
    pub name: String,
}

/// Why a peer was removed from a room, carried on `peer-left`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DepartureReason {
    Normal,
    Timeout,
    Stale,
}

/// Messages the relay sends to a peer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(rename = "peerId")]
        peer_id: String,
        name: String,
    },

    #[serde(rename = "joined")]
    Joined {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "peerId")]
        peer_id: String,
        peers: Vec<PeerSummary>,
        #[serde(rename = "isReconnection", skip_serializing_if = "Option::is_none")]
        is_reconnection: Option<bool>,
    },

    #[serde(rename = "peer-joined")]
    PeerJoined { peer: PeerSummary },

    #[serde(rename = "peer-reconnected")]
    PeerReconnected { peer: PeerSummary },

    #[serde(rename = "left")]
    Left {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<DepartureReason>,
    },

    #[serde(rename = "offer")]
    Offer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        #[serde(rename = "fromPeerName")]
        from_peer_name: String,
        sdp: Value,
    },

    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        sdp: Value,
    },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        candidate: Value,
    },

    #[serde(rename = "file-request")]
    FileRequest {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        #[serde(rename = "fromPeerName")]
        from_peer_name: String,
        #[serde(rename = "fileInfo", skip_serializing_if = "Option::is_none")]
        file_info: Option<Value>,
    },

    #[serde(rename = "file-accept")]
    FileAccept {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        #[serde(rename = "fileInfo", skip_serializing_if = "Option::is_none")]
        file_info: Option<Value>,
    },

    #[serde(rename = "file-reject")]
    FileReject {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    #[serde(rename = "error")]
    Error { error: String },

    #[serde(rename = "server-shutdown")]
    ServerShutdown {},
}

/// Decode an inbound text frame into a `ClientMessage`, distinguishing the
/// three protocol-error cases the transport adapter must report (§4.4/4.5):
/// invalid JSON, a missing `type` field, and an unrecognized `type` value.
pub fn decode(text: &str) -> Result<ClientMessage, crate::error::RelayError> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| crate::error::RelayError::InvalidJson)?;
    let Some(type_value) = value.get("type") else {
        return Err(crate::error::RelayError::MissingType);
    };
    let Some(type_str) = type_value.as_str() else {
        return Err(crate::error::RelayError::MissingType);
    };
    serde_json::from_value::<ClientMessage>(value.clone())
        .map_err(|_| crate::error::RelayError::UnknownType(type_str.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_join() {
        let msg = decode(r#"{"type":"join","roomId":"ROOM01","name":"Alice"}"#).unwrap();
        match msg {
            ClientMessage::Join { room_id, name, .. } => {
                assert_eq!(room_id, "ROOM01");
                assert_eq!(name.as_deref(), Some("Alice"));
            }
            _ => panic!("expected Join"),
        }
    }

    #[test]
    fn decodes_offer_with_opaque_sdp() {
        let msg = decode(
            r#"{"type":"offer","targetPeerId":"peer_abc","sdp":{"type":"offer","sdp":"v=0...","extra":{"nested":true}}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Offer { target_peer_id, sdp } => {
                assert_eq!(target_peer_id, "peer_abc");
                assert_eq!(sdp["extra"]["nested"], Value::Bool(true));
            }
            _ => panic!("expected Offer"),
        }
    }

    #[test]
    fn rejects_invalid_json() {
        let err = decode("not json").unwrap_err();
        assert_eq!(err, crate::error::RelayError::InvalidJson);
    }

    #[test]
    fn rejects_missing_type() {
        let err = decode(r#"{"roomId":"ROOM01"}"#).unwrap_err();
        assert_eq!(err, crate::error::RelayError::MissingType);
    }

    #[test]
    fn rejects_unknown_type() {
        let err = decode(r#"{"type":"frobnicate"}"#).unwrap_err();
        assert_eq!(
            err,
            crate::error::RelayError::UnknownType("frobnicate".to_string())
        );
    }

    #[test]
    fn serializes_error_envelope() {
        let msg = ServerMessage::Error {
            error: "Room is full".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""error":"Room is full""#));
    }

    #[test]
    fn serializes_joined_without_reconnection_flag_when_absent() {
        let msg = ServerMessage::Joined {
            room_id: "ROOM01".into(),
            peer_id: "peer_abc123456789".into(),
            peers: vec![],
            is_reconnection: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("isReconnection"));
    }

    #[test]
    fn serializes_peer_joined() {
        let msg = ServerMessage::PeerJoined {
            peer: PeerSummary {
                id: "peer_abc".into(),
                name: "Bob".into(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"peer-joined""#));
        assert!(json.contains(r#""name":"Bob""#));
    }
}
