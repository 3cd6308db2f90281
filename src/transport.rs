//! Transport adapter (§4.4) and control surface (§4.8/§6.3).
//!
//! One axum `Router` serves both: the `/ws` WebSocket upgrade that frames
//! peer connections, and the plain HTTP health/stats/room-existence routes.
//! Grounded in `tallow-relay`'s `websocket.rs` (`ws_router`, a `CorsLayer`,
//! `WebSocketUpgrade` + `on_upgrade`), generalized from its binary/postcard
//! bridging to this relay's UTF-8 JSON text-frame protocol.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::id::mint_peer_id;
use crate::protocol::{DepartureReason, ServerMessage};
use crate::router::route;
use crate::state::AppState;

/// Build the combined HTTP + WebSocket router (§4.8/§6.1).
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origin);
    let ws_path = state.config.ws_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/room/:room_id", get(room_exists_handler))
        .fallback(not_found_handler)
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer advertising `configured` (§6.3): `*` reflects any
/// origin, anything else is pinned to that exact value. Methods/headers are
/// the fixed `GET, OPTIONS` / `Content-Type` the control surface needs.
fn cors_layer(configured: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([HeaderName::from_static("content-type")]);

    match configured {
        "*" => layer.allow_origin(Any),
        origin => match HeaderValue::from_str(origin) {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                warn!(origin, "invalid cors.origin, falling back to '*'");
                layer.allow_origin(Any)
            }
        },
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    name: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    // Oversize frames are rejected with an `error` frame rather than a
    // transport-level close (§4.4), so the size ceiling is enforced in
    // `handle_connection`'s read loop, not via axum's `max_message_size`
    // (which would terminate the connection instead of replying in-place).
    ws.on_upgrade(move |socket| handle_connection(socket, state, query.name))
}

/// Per-connection lifecycle (§4.4): mint a peer, send `welcome`, bridge
/// inbound frames to the router and outbound `ServerMessage`s back out, and
/// synthesize a `peer-left` broadcast plus registry cleanup on close.
///
/// A single task owns both halves of the socket so a supervisor-requested
/// close (heartbeat eviction, graceful shutdown) can write the exact close
/// code/reason to the wire before the task exits — a spawned writer task
/// reading only `ServerMessage`s would have no way to carry that code.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>, name: Option<String>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut peer_id = mint_peer_id();
    let display_name = name.unwrap_or_else(|| "Anonymous".to_string());
    let mut close_rx = state
        .peers
        .create(peer_id.clone(), tx.clone(), display_name.clone());

    if tx
        .send(ServerMessage::Welcome {
            peer_id: peer_id.clone(),
            name: display_name,
        })
        .is_err()
    {
        return;
    }

    let max_payload = state.config.ws_max_payload_size;
    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        let Ok(text) = serde_json::to_string(&msg) else { continue };
                        if ws_sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if text.len() > max_payload {
                            let _ = tx.send(ServerMessage::Error {
                                error: "Message too large".to_string(),
                            });
                            continue;
                        }
                        let outcome = route(&state, &peer_id, &text);
                        if let Some(adopted) = outcome.adopted_peer_id {
                            peer_id = adopted;
                        }
                        if let Some(response) = outcome.response {
                            let _ = tx.send(response);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(peer_id = %peer_id, error = %e, "transport read error");
                        break;
                    }
                }
            }

            Some(close) = close_rx.recv() => {
                debug!(peer_id = %peer_id, code = close.code, "closing transport on request");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                        code: close.code,
                        reason: close.reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }

    // Marks the record `Closed` rather than deleting it outright, so a
    // same-identity rejoin within `reconnect.grace` can be adopted back in
    // (§9); the grace-expiry reap in the stale sweep deletes it for good if
    // that never happens. A no-op, returning `None`, if a supervisor
    // eviction already ran this and broadcast `peer-left` with a specific
    // reason before requesting the close this loop just acted on.
    if let Some((room_id, _name)) = state.peers.disconnect(&state.rooms, &peer_id) {
        if let Some(room_id) = room_id {
            state.peers.broadcast(
                &state.rooms,
                &room_id,
                &peer_id,
                ServerMessage::PeerLeft {
                    peer_id: peer_id.clone(),
                    reason: Some(DepartureReason::Normal),
                },
            );
        }
    }
    let _ = ws_sink.close().await;
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime": state.uptime_secs(),
        "peers": state.peers.count(),
        "rooms": {
            "count": state.rooms.room_count(),
            "members": state.rooms.total_members(),
        },
        "timestamp": epoch_seconds(),
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let peers: Vec<_> = state
        .peers
        .all_snapshots()
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "roomId": p.room_id,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "uptime": state.uptime_secs(),
        "peers": peers,
        "rooms": {
            "count": state.rooms.room_count(),
            "members": state.rooms.total_members(),
            "maxRooms": state.config.max_rooms,
            "maxPeersPerRoom": state.config.max_peers_per_room,
        },
        "timestamp": epoch_seconds(),
    }))
}

async fn room_exists_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "exists": state.rooms.exists(&room_id),
        "roomId": room_id,
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}

/// Broadcast `server-shutdown` to every open peer, then close each
/// transport with close code 1001 (§4.9/S6).
pub async fn shutdown_all_peers(state: &AppState) {
    for peer_id in state.peers.open_peer_ids() {
        if !state
            .peers
            .send_to(&peer_id, ServerMessage::ServerShutdown {})
        {
            warn!(peer_id = %peer_id, "failed to deliver server-shutdown");
        }
        state.peers.mark_closing(&peer_id);
        state
            .peers
            .request_close(&peer_id, crate::peer::CLOSE_GOING_AWAY, "server shutting down");
    }
    info!("server-shutdown broadcast to all open peers");
}
