// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real control-plane and agent
//! binaries and exercise registration, the agent WebSocket protocol, and the
//! operator-facing HTTP/WebSocket surface.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use sessionhub_specs::{
    wait_for_connected_agents, AgentProcess, ControlPlaneProcess, FakeDaemon,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn health_reports_leader_state_and_zero_agents_on_startup() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/health", control_plane.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["connected_agents"], 0);
    assert_eq!(resp["leader_state"], "leader");
    assert!(resp["uptime_secs"].is_number());

    Ok(())
}

#[tokio::test]
async fn register_agent_rejects_empty_agent_id() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/agents/register", control_plane.base_url()))
        .json(&serde_json::json!({ "agent_id": "", "org_id": "org-1", "host": "h", "capacity": 1, "labels": {} }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 400);

    Ok(())
}

#[tokio::test]
async fn register_agent_returns_heartbeat_interval() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/api/v1/agents/register", control_plane.base_url()))
        .json(&serde_json::json!({ "agent_id": "agent-1", "org_id": "org-1", "host": "h", "capacity": 2, "labels": {} }))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(resp["agent_id"], "agent-1");
    assert!(resp["heartbeat_interval_secs"].as_u64().is_some());

    Ok(())
}

#[tokio::test]
async fn real_agent_process_registers_and_connects() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;
    let daemon = FakeDaemon::spawn().await?;

    let _agent = AgentProcess::start("agent-e2e", &control_plane, &daemon)?;
    wait_for_connected_agents(&control_plane, 1, TIMEOUT).await?;

    Ok(())
}

#[tokio::test]
async fn agent_disconnect_is_reflected_in_health() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;
    let daemon = FakeDaemon::spawn().await?;

    let agent = AgentProcess::start("agent-e2e-2", &control_plane, &daemon)?;
    wait_for_connected_agents(&control_plane, 1, TIMEOUT).await?;

    drop(agent);
    wait_for_connected_agents(&control_plane, 0, TIMEOUT).await?;

    Ok(())
}

#[tokio::test]
async fn raw_agent_socket_heartbeat_keeps_it_connected() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) =
        tokio_tungstenite::connect_async(control_plane.ws_connect_url("raw-agent", 3)).await?;
    wait_for_connected_agents(&control_plane, 1, TIMEOUT).await?;

    let heartbeat = serde_json::json!({
        "type": "heartbeat",
        "active_sessions": 0,
        "capacity": 3,
        "ts": "2026-07-26T00:00:00Z",
    });
    ws.send(Message::Text(heartbeat.to_string().into())).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/health", control_plane.base_url())).await?.json().await?;
    assert_eq!(resp["connected_agents"], 1);

    ws.close(None).await?;
    Ok(())
}

#[tokio::test]
async fn vnc_token_issuance_requires_signing_key_configured() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;

    // No --vnc-signing-key was passed, so token issuance must fail closed
    // rather than silently minting an unsigned token.
    let resp = reqwest::get(format!(
        "{}/api/v1/sessions/sess-1/vnc?user_id=user-1",
        control_plane.base_url()
    ))
    .await?;
    assert_eq!(resp.status().as_u16(), 500);

    Ok(())
}

#[tokio::test]
async fn broadcast_sessions_socket_accepts_upgrade_with_org_id() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;

    let url =
        format!("ws://127.0.0.1:{}/ws/sessions?org_id=org-1", control_plane_port(&control_plane));
    let (mut ws, resp) = tokio_tungstenite::connect_async(url).await?;
    assert_eq!(resp.status().as_u16(), 101);

    let msg = tokio::time::timeout(TIMEOUT, ws.next()).await?;
    assert!(msg.is_some());

    Ok(())
}

#[tokio::test]
async fn broadcast_sessions_socket_rejects_missing_org_id() -> anyhow::Result<()> {
    let control_plane = ControlPlaneProcess::start()?;
    control_plane.wait_healthy(TIMEOUT).await?;

    let resp = reqwest::get(format!(
        "{}/ws/sessions",
        control_plane.base_url()
    ))
    .await?;
    assert_eq!(resp.status().as_u16(), 400);

    Ok(())
}

fn control_plane_port(control_plane: &ControlPlaneProcess) -> u16 {
    control_plane
        .base_url()
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .expect("control plane base url has a port")
}
