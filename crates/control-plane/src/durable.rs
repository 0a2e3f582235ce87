// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable persistence of command and agent-connection records to the shared
//! JetStream KV bucket, so a replica that restarts (or a sibling answering a
//! forwarded query) can recover command outcomes and agent status instead of
//! only ever knowing what's in its own in-memory maps. Calls are
//! fire-and-forget, the same style [`crate::shared_state::advertise_owner`]
//! uses: a write that's lost to a transient NATS outage just means the next
//! status mutation retries it, not a hard failure of the mutation itself.

use async_nats::jetstream;
use serde::{Deserialize, Serialize};
use sessionhub_protocol::CommandAction;
use tracing::warn;

use crate::state::{CommandRecord, CommandStatus, ControlPlaneState};

#[derive(Debug, Serialize, Deserialize)]
struct DurableCommand {
    id: String,
    agent_id: String,
    action: CommandAction,
    status: CommandStatus,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DurableAgentStatus {
    agent_id: String,
    connected: bool,
    instance_id: String,
    updated_at: String,
}

/// Persist the current state of a command record under `commands.{id}`.
pub async fn persist_command(state: &ControlPlaneState, record: &CommandRecord) {
    let Some(store) = kv_store(state).await else { return };
    let durable = DurableCommand {
        id: record.id.to_string(),
        agent_id: record.agent_id.clone(),
        action: record.action,
        status: record.status,
        result: record.result.clone(),
        error: record.error.clone(),
    };
    let Ok(bytes) = serde_json::to_vec(&durable) else { return };
    if let Err(e) = store.put(format!("commands.{}", durable.id), bytes.into()).await {
        warn!(err = %e, command_id = %durable.id, "failed to persist command record");
    }
}

/// Persist this replica's view of an agent's connection status under
/// `agent_status.{agent_id}`.
pub async fn persist_agent_status(state: &ControlPlaneState, agent_id: &str, connected: bool) {
    let Some(store) = kv_store(state).await else { return };
    let record = DurableAgentStatus {
        agent_id: agent_id.to_owned(),
        connected,
        instance_id: state.instance_id.clone(),
        updated_at: sessionhub_protocol::iso8601_now(),
    };
    let Ok(bytes) = serde_json::to_vec(&record) else { return };
    if let Err(e) = store.put(format!("agent_status.{agent_id}"), bytes.into()).await {
        warn!(err = %e, agent_id, "failed to persist agent status");
    }
}

async fn kv_store(state: &ControlPlaneState) -> Option<jetstream::kv::Store> {
    let client = state.nats_client.read().await.clone()?;
    let js = jetstream::new(client);
    js.get_key_value(&state.config.kv_bucket).await.ok()
}
