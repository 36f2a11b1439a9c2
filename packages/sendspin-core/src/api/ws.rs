//! WebSocket upgrade handler: wires an inbound connection to a [`Session`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::response::IntoResponse;
use futures::StreamExt;

use crate::api::AppState;
use crate::api::ws_transport::WsTransport;
use crate::message::ConnectionReason;
use crate::session::{Session, SessionConfig};

/// Counter handing out the opaque per-socket id the registry keys on before
/// a session's `client_id` is known.
static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Best-effort `ConnectInfo` extraction: `None` when the server wasn't
/// bound with `into_make_service_with_connect_info`.
pub struct MaybeConnectInfo(Option<std::net::SocketAddr>);

impl<S> FromRequestParts<S> for MaybeConnectInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeConnectInfo(
            parts
                .extensions
                .get::<ConnectInfo<std::net::SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

/// Upgrade entry point, mounted at `config.ws_path`.
///
/// Query parameters `zone` and `player` are the per-connection metadata
/// described in spec §4.4 (extracted from the URL, not the handshake body).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    MaybeConnectInfo(connect_info): MaybeConnectInfo,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let remote_addr = connect_info.map(|addr| addr.to_string());
    let zone_id = params.get("zone").and_then(|v| v.parse::<i64>().ok());
    let player_id = params.get("player").cloned();
    let connection_reason = if player_id.is_some() {
        ConnectionReason::Playback
    } else {
        ConnectionReason::Discovery
    };

    ws.on_upgrade(move |socket| {
        handle_ws(socket, state, remote_addr, zone_id, player_id, connection_reason)
    })
}

async fn handle_ws(
    socket: axum::extract::ws::WebSocket,
    state: AppState,
    remote_addr: Option<String>,
    zone_id: Option<i64>,
    player_id: Option<String>,
    connection_reason: ConnectionReason,
) {
    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();
    let socket_id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);

    let (transport, mut reader) = WsTransport::new(socket);

    let session = Session::new(
        Arc::new(transport),
        state.spawner.clone(),
        SessionConfig {
            server_id: state.config.server_id.clone(),
            server_name: state.config.server_name.clone(),
            supported_roles: (*state.supported_roles).clone(),
            connection_reason,
            remote_addr,
            player_id,
            zone_id,
            initial_state_timeout_ms: state.config.initial_state_timeout_ms,
        },
    );

    state.registry.register(socket_id, session.clone());
    tracing::info!(socket_id, "websocket connection established");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::info!(socket_id, "connection force-closed");
                break;
            }
            msg = reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.handle_text(&text).await;
                        if let Some(client_id) = session.client_id() {
                            state.registry.bind_client_id(socket_id, &client_id, &session);
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        session.handle_binary(&data).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    session.destroy().await;
    state.registry.unregister(socket_id, session.client_id().as_deref());
    tracing::info!(socket_id, "websocket connection closed");
}
