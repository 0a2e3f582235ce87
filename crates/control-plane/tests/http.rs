// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the control-plane HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

use std::sync::Arc;

use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use sessionhub_control_plane::config::{ControlPlaneConfig, ElectionBackendKind};
use sessionhub_control_plane::state::ControlPlaneState;
use sessionhub_control_plane::transport::build_router;

fn test_config() -> ControlPlaneConfig {
    ControlPlaneConfig {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token: None,
        vnc_signing_key: None,
        heartbeat_secs: 15,
        stale_secs: 45,
        sweep_secs: 10,
        command_retention_secs: 300,
        vnc_idle_secs: 600,
        sessions_broadcast_ms: 3000,
        metrics_broadcast_ms: 5000,
        nats_url: "nats://127.0.0.1:4222".into(),
        kv_bucket: "sessionhub".into(),
        task_id: None,
        election_backend: ElectionBackendKind::FileLock,
        election_lock_path: "/tmp/sessionhub/control-plane-http-test.lock".into(),
        election_namespace: "default".into(),
        election_service_name: "sessionhub-control-plane".into(),
    }
}

fn test_config_with_signing_key() -> ControlPlaneConfig {
    ControlPlaneConfig { vnc_signing_key: Some("test-signing-key".into()), ..test_config() }
}

fn test_state(config: ControlPlaneConfig) -> Arc<ControlPlaneState> {
    Arc::new(ControlPlaneState::new(config, CancellationToken::new()))
}

fn test_server(state: Arc<ControlPlaneState>) -> TestServer {
    let router = build_router(state);
    TestServer::new(router).expect("failed to create test server")
}

#[tokio::test]
async fn health_reports_zero_agents_and_unknown_leader_state_before_election_spawns() {
    let state = test_state(test_config());
    let server = test_server(state);

    let resp = server.get("/health").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected_agents"], 0);
    // `election::spawn` is invoked from `run_with_state`, not from a bare
    // `ControlPlaneState`, so a state built directly for a test server has
    // no elector yet.
    assert_eq!(body["leader_state"], "unknown");
}

#[tokio::test]
async fn register_agent_rejects_blank_id() {
    let state = test_state(test_config());
    let server = test_server(state);

    let resp = server
        .post("/api/v1/agents/register")
        .json(&serde_json::json!({ "agent_id": "", "org_id": "org-1", "host": "h", "capacity": 1, "labels": {} }))
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_agent_echoes_id_and_heartbeat_interval() {
    let state = test_state(test_config());
    let server = test_server(state);

    let resp = server
        .post("/api/v1/agents/register")
        .json(&serde_json::json!({ "agent_id": "agent-1", "org_id": "org-1", "host": "h", "capacity": 4, "labels": {} }))
        .await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["agent_id"], "agent-1");
    assert_eq!(body["heartbeat_interval_secs"], 15);
}

#[tokio::test]
async fn issue_vnc_token_fails_without_signing_key_configured() {
    let state = test_state(test_config());
    let server = test_server(state);

    let resp = server.get("/api/v1/sessions/sess-1/vnc?user_id=user-1").await;
    resp.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn issue_vnc_token_succeeds_with_signing_key_configured() {
    let state = test_state(test_config_with_signing_key());
    let server = test_server(state);

    let resp = server.get("/api/v1/sessions/sess-1/vnc?user_id=user-1").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
}
