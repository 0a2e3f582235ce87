// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the control plane.

pub mod auth;
pub mod http;
pub mod ws;
pub mod ws_broadcast;
pub mod ws_vnc;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::ControlPlaneState;

/// Build the axum `Router` with every control-plane route.
pub fn build_router(state: Arc<ControlPlaneState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(http::health))
        // Agent Hub
        .route("/api/v1/agents/register", post(http::register_agent))
        .route("/api/v1/agents/connect", get(ws::connect_handler))
        // VNC Proxy
        .route("/api/v1/sessions/{id}/vnc", get(http::issue_vnc_token))
        .route("/ws/vnc", get(ws_vnc::vnc_handler))
        // Broadcast Fabric
        .route("/ws/sessions", get(ws_broadcast::sessions_handler))
        .route("/ws/metrics", get(ws_broadcast::metrics_handler))
        .route("/ws/logs", get(ws_broadcast::logs_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
