// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast Fabric WebSocket endpoints: `/ws/sessions`, `/ws/metrics`, `/ws/logs`.
//!
//! `/ws/sessions` and `/ws/metrics` require an `org_id` query parameter and
//! register the client with [`crate::client_registry::ClientRegistry`], so a
//! client only ever receives snapshots scoped to its own tenant. `/ws/logs`
//! carries operator-facing server logs rather than tenant data, so it stays
//! a plain broadcast subscription with no `org_id` requirement.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::state::ControlPlaneState;

#[derive(Debug, Deserialize)]
pub struct OrgScopedQuery {
    pub org_id: String,
}

pub async fn sessions_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ControlPlaneState>>,
    Query(query): Query<OrgScopedQuery>,
) -> Response {
    if query.org_id.trim().is_empty() {
        return axum::http::StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        let (client_id, rx) = state.broadcasts.sessions.register(query.org_id).await;
        relay_scoped(socket, rx, |v| serde_json::to_string(&v).ok()).await;
        state.broadcasts.sessions.unregister(client_id).await;
    })
}

pub async fn metrics_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ControlPlaneState>>,
    Query(query): Query<OrgScopedQuery>,
) -> Response {
    if query.org_id.trim().is_empty() {
        return axum::http::StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        let (client_id, rx) = state.broadcasts.metrics.register(query.org_id).await;
        relay_scoped(socket, rx, |v| serde_json::to_string(&v).ok()).await;
        state.broadcasts.metrics.unregister(client_id).await;
    })
}

pub async fn logs_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ControlPlaneState>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let rx = state.broadcasts.logs_tx.subscribe();
        relay_broadcast(socket, rx, |line: Arc<str>| Some(line.to_string())).await;
    })
}

/// Drain a per-client registry channel until the client disconnects or the
/// channel closes (the registry evicted it for falling behind).
async fn relay_scoped<T: Send + 'static>(
    mut socket: WebSocket,
    mut rx: tokio::sync::mpsc::Receiver<T>,
    encode: impl Fn(T) -> Option<String>,
) {
    loop {
        tokio::select! {
            value = rx.recv() => {
                let Some(value) = value else { break };
                let Some(text) = encode(value) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // clients don't send anything meaningful on these endpoints
                }
            }
        }
    }
}

async fn relay_broadcast<T: Clone + Send + 'static>(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<T>,
    encode: impl Fn(T) -> Option<String>,
) {
    loop {
        tokio::select! {
            value = rx.recv() => {
                match value {
                    Ok(value) => {
                        let Some(text) = encode(value) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!("broadcast relay lagged {n} messages, client falling behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // clients don't send anything meaningful on these endpoints
                }
            }
        }
    }
}
