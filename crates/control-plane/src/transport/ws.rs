// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-facing WebSocket: `GET /api/v1/agents/connect?agent_id=...&org_id=...&capacity=...&token=...`.
//!
//! One socket per agent. Frames from the agent are routed to the dispatcher
//! (ack/complete/fail), the agent hub (heartbeat), or the VNC proxy (data
//! relay); frames queued for the agent are forwarded out as they arrive on
//! its `mpsc` channel.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sessionhub_protocol::AgentFrame;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::ControlPlaneState;
use crate::{agent_hub, dispatcher, transport::auth, vnc};

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub agent_id: String,
    pub org_id: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_capacity() -> u32 {
    1
}

pub async fn connect_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ControlPlaneState>>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    if let Err(_err) =
        auth::validate_ws_query(&query.token.clone().unwrap_or_default(), state.config.auth_token.as_deref())
    {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, query.agent_id, query.capacity, query.org_id)
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<ControlPlaneState>,
    agent_id: String,
    capacity: u32,
    org_id: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (entry, mut outbound) = agent_hub::connect(&state, agent_id.clone(), capacity, org_id).await;
    dispatcher::redeliver_for_reconnect(&state, &agent_id).await;

    let cancel = entry.cancel.clone();

    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    let Ok(json) = serde_json::to_string(&frame) else { continue };
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<AgentFrame>(&text) else {
            warn!(agent_id = %agent_id, "dropping malformed agent frame");
            continue;
        };
        handle_agent_frame(&state, &agent_id, frame).await;
    }

    debug!(agent_id = %agent_id, "agent socket closed");
    state.remove_agent(&agent_id).await;
    writer.abort();
}

async fn handle_agent_frame(state: &ControlPlaneState, agent_id: &str, frame: AgentFrame) {
    match frame {
        AgentFrame::Ack { command_id } => {
            if let Ok(id) = Uuid::parse_str(&command_id) {
                dispatcher::ack(state, id).await;
            }
        }
        AgentFrame::Complete { command_id, result } => {
            if let Ok(id) = Uuid::parse_str(&command_id) {
                dispatcher::complete(state, id, result).await;
            }
        }
        AgentFrame::Failed { command_id, error } => {
            if let Ok(id) = Uuid::parse_str(&command_id) {
                dispatcher::fail(state, id, error).await;
            }
        }
        AgentFrame::Heartbeat { .. } | AgentFrame::Status { .. } => {
            agent_hub::heartbeat(state, agent_id).await;
        }
        AgentFrame::Pong {} => {
            agent_hub::heartbeat(state, agent_id).await;
        }
        AgentFrame::VncReady { tunnel_id } => {
            vnc::touch_tunnel(state, &tunnel_id).await;
        }
        AgentFrame::VncData { tunnel_id, data } => {
            vnc::touch_tunnel(state, &tunnel_id).await;
            relay_to_browser(state, &tunnel_id, data).await;
        }
        AgentFrame::VncError { tunnel_id, error } => {
            warn!(tunnel_id = %tunnel_id, error = %error, "agent reported vnc error");
            vnc::close_tunnel(state, &tunnel_id).await;
        }
    }
}

/// Forward a base64 VNC chunk received from the agent to the browser side of
/// the same tunnel, via the channel registered in its [`crate::state::TunnelRecord`].
async fn relay_to_browser(state: &ControlPlaneState, tunnel_id: &str, data: String) {
    if let Some(record) = state.tunnels.read().await.get(tunnel_id) {
        let _ = record.to_browser.send(data);
    }
}
