// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `POST /api/v1/agents/register`. One call, no internal retry: the
//! reconnect loop in [`crate::connection`] re-registers on every dial
//! attempt, so retry/backoff lives there rather than being duplicated here.

use sessionhub_protocol::{AgentRegistration, AgentRegistrationAck};

use crate::config::AgentConfig;

pub async fn register(
    client: &reqwest::Client,
    config: &AgentConfig,
) -> anyhow::Result<AgentRegistrationAck> {
    let url = format!("{}/api/v1/agents/register", config.control_plane_url.trim_end_matches('/'));
    let body = AgentRegistration {
        agent_id: config.agent_id.clone(),
        org_id: config.org_id.clone(),
        host: config.host.clone(),
        capacity: config.capacity,
        labels: serde_json::json!({}),
    };

    let mut req = client.post(&url).json(&body).timeout(std::time::Duration::from_secs(10));
    if let Some(token) = &config.auth_token {
        req = req.bearer_auth(token);
    }

    let resp = req.send().await?.error_for_status()?;
    Ok(resp.json::<AgentRegistrationAck>().await?)
}
