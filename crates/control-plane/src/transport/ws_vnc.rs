// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser-facing VNC relay: `GET /ws/vnc?token=...`.
//!
//! The token (from `GET /api/v1/sessions/{id}/vnc`) authorizes a session ID
//! and names the user it was issued to; the agent hosting that session is
//! looked up from [`crate::state::ControlPlaneState::session_owner`] rather
//! than trusted from the client, so a browser cannot redirect a token onto an
//! agent it doesn't own simply by naming a different `agent_id`.
//! Binary frames from the browser are base64-encoded and dispatched to the
//! agent tagged with a tunnel ID; chunks the agent relays back arrive on the
//! tunnel's channel and are decoded and forwarded to the browser as binary.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sessionhub_protocol::{CommandAction, HubFrame};
use tracing::{debug, warn};

use crate::state::ControlPlaneState;
use crate::{agent_hub, dispatcher, vnc};

#[derive(Debug, Deserialize)]
pub struct VncQuery {
    pub token: String,
}

pub async fn vnc_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ControlPlaneState>>,
    Query(query): Query<VncQuery>,
) -> Response {
    let Some(signing_key) = state.config.vnc_signing_key.clone() else {
        return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let claims = match vnc::verify_token(signing_key.as_bytes(), &query.token) {
        Ok(claims) => claims,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };

    let Some(agent_id) = state.session_owner(&claims.session_id).await else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };

    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, claims.session_id, claims.user_id, agent_id)
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<ControlPlaneState>,
    session_id: String,
    user_id: String,
    agent_id: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tunnel_id, mut from_agent) = vnc::open_tunnel(&state, &session_id, &agent_id).await;
    debug!(tunnel_id = %tunnel_id, agent_id = %agent_id, user_id = %user_id, "vnc session authorized");

    dispatcher::dispatch(
        &state,
        &agent_id,
        &session_id,
        CommandAction::CreateVncTunnel,
        serde_json::json!({ "tunnel_id": tunnel_id }),
    )
    .await
    .ok();

    let forward_tunnel_id = tunnel_id.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(data) = from_agent.recv().await {
            let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) else {
                continue;
            };
            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        debug!(tunnel_id = %forward_tunnel_id, "vnc forwarder closed");
    });

    while let Some(Ok(msg)) = stream.next().await {
        let bytes = match msg {
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            _ => continue,
        };
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let frame = HubFrame::VncData { tunnel_id: tunnel_id.clone(), data };
        if agent_hub::send(&state, &agent_id, frame).await.is_err() {
            warn!(tunnel_id = %tunnel_id, "agent disconnected mid-tunnel");
            break;
        }
        vnc::touch_tunnel(&state, &tunnel_id).await;
    }

    forwarder.abort();
    vnc::close_tunnel(&state, &tunnel_id).await;
}
