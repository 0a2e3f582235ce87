// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: agent registration and health.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sessionhub_protocol::{AgentRegistration, AgentRegistrationAck};
use serde::Serialize;

use crate::error::SessionHubError;
use crate::state::ControlPlaneState;

/// `POST /api/v1/agents/register` — records intent to connect; the actual
/// WebSocket dial at `GET /api/v1/agents/connect` is what creates the live
/// [`crate::state::AgentEntry`]. Registration exists as a separate step so an
/// agent can be told its heartbeat interval before it opens the socket.
pub async fn register_agent(
    State(state): State<Arc<ControlPlaneState>>,
    Json(req): Json<AgentRegistration>,
) -> Result<Json<AgentRegistrationAck>, Response> {
    if req.agent_id.trim().is_empty() {
        let (status, body) =
            SessionHubError::BadRequest.to_http_response("agent_id must not be empty");
        return Err((status, body).into_response());
    }

    Ok(Json(AgentRegistrationAck {
        agent_id: req.agent_id,
        heartbeat_interval_secs: state.config.heartbeat_secs,
    }))
}

#[derive(Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub connected_agents: usize,
    pub pending_commands: usize,
    pub active_tunnels: usize,
    pub leader_state: &'static str,
    pub uptime_secs: u64,
}

/// `GET /health` — liveness/readiness probe, exempt from bearer auth.
pub async fn health(State(state): State<Arc<ControlPlaneState>>) -> impl IntoResponse {
    let connected_agents = state.agent_count().await;
    let pending_commands =
        state.commands.read().await.values().filter(|r| !r.status.is_terminal()).count();
    let active_tunnels = state.tunnels.read().await.len();
    let leader_state = match state.elector.read().await.as_ref() {
        Some(elector) => match elector.state() {
            sessionhub_election::ElectorState::Leader => "leader",
            sessionhub_election::ElectorState::Standby => "standby",
            sessionhub_election::ElectorState::Stopped => "stopped",
        },
        None => "unknown",
    };

    (
        StatusCode::OK,
        Json(HealthBody {
            status: "ok",
            connected_agents,
            pending_commands,
            active_tunnels,
            leader_state,
            uptime_secs: state.uptime_secs(),
        }),
    )
}

#[derive(serde::Deserialize)]
pub struct IssueVncTokenQuery {
    pub user_id: String,
}

/// `GET /api/v1/sessions/{id}/vnc?user_id=...` — issue a short-lived signed
/// VNC access token for the browser to present when dialing `GET /ws/vnc`.
pub async fn issue_vnc_token(
    State(state): State<Arc<ControlPlaneState>>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
    axum::extract::Query(query): axum::extract::Query<IssueVncTokenQuery>,
) -> Result<Json<serde_json::Value>, Response> {
    let Some(signing_key) = state.config.vnc_signing_key.as_deref() else {
        let (status, body) =
            SessionHubError::Internal.to_http_response("vnc signing key not configured");
        return Err((status, body).into_response());
    };

    let token = crate::vnc::issue_token(signing_key.as_bytes(), &session_id, &query.user_id);
    Ok(Json(serde_json::json!({ "token": token })))
}
