// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-instance shared state: publishes agent lifecycle events to NATS for
//! external consumers, and maintains an advisory JetStream KV key per
//! connected agent recording which control-plane replica owns its WebSocket,
//! so a sibling replica receiving an operator request for that agent knows to
//! forward rather than answer `NotFound`.

use std::sync::Arc;

use async_nats::jetstream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sessionhub_protocol::HubFrame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControlPlaneConfig;
use crate::state::{ControlPlaneState, LifecycleEvent};

const ADVISORY_SUBJECT_PREFIX: &str = "sessionhub.agents";

/// Connect to NATS, ensure the shared KV bucket exists, store the client on
/// state for publishers elsewhere, and spawn the lifecycle-event forwarder.
pub async fn connect(state: &Arc<ControlPlaneState>, config: &ControlPlaneConfig) -> anyhow::Result<()> {
    let opts = async_nats::ConnectOptions::new().retry_on_initial_connect();
    info!(url = %config.nats_url, "connecting to NATS for shared state");
    let client = opts.connect(&config.nats_url).await?;

    let js = jetstream::new(client.clone());
    let bucket_config = jetstream::kv::Config {
        bucket: config.kv_bucket.clone(),
        history: 1,
        ..Default::default()
    };
    // `create_key_value` fails if the bucket already exists; treat that as success.
    let _ = js.create_key_value(bucket_config).await;

    *state.nats_client.write().await = Some(client);
    info!("NATS shared state connected");

    spawn_lifecycle_forwarder(Arc::clone(state), config.nats_url.clone());
    spawn_command_inbox(Arc::clone(state));
    Ok(())
}

/// Record this replica as the owner of an agent's connection in the shared KV bucket.
pub async fn advertise_owner(
    state: &ControlPlaneState,
    agent_id: &str,
    replica_id: &str,
) -> anyhow::Result<()> {
    let Some(client) = state.nats_client.read().await.clone() else {
        return Ok(());
    };
    let js = jetstream::new(client);
    let store = js.get_key_value(&state.config.kv_bucket).await?;
    store.put(format!("agents.{agent_id}"), replica_id.as_bytes().to_vec().into()).await?;
    Ok(())
}

/// Look up which replica owns an agent's connection, if known.
pub async fn owner_of(state: &ControlPlaneState, agent_id: &str) -> Option<String> {
    let client = state.nats_client.read().await.clone()?;
    let js = jetstream::new(client);
    let store = js.get_key_value(&state.config.kv_bucket).await.ok()?;
    let entry = store.get(format!("agents.{agent_id}")).await.ok()??;
    String::from_utf8(entry.to_vec()).ok()
}

/// Clear the ownership record for an agent that has disconnected from this replica.
pub async fn clear_owner(state: &ControlPlaneState, agent_id: &str) {
    let Some(client) = state.nats_client.read().await.clone() else { return };
    let js = jetstream::new(client);
    if let Ok(store) = js.get_key_value(&state.config.kv_bucket).await {
        let _ = store.delete(format!("agents.{agent_id}")).await;
    }
}

/// Payload published to `pod:{instance_id}:commands`, carrying a frame meant
/// for an agent connected to that specific replica.
#[derive(Debug, Serialize, Deserialize)]
struct RoutedCommand {
    agent_id: String,
    message: HubFrame,
}

/// Forward a frame to the replica identified as `owner_instance`'s owner of
/// `agent_id`'s connection, over `pod:{owner_instance}:commands`.
pub async fn publish_command(
    state: &ControlPlaneState,
    owner_instance: &str,
    agent_id: &str,
    frame: &HubFrame,
) -> Result<(), ()> {
    let Some(client) = state.nats_client.read().await.clone() else { return Err(()) };
    let routed = RoutedCommand { agent_id: agent_id.to_owned(), message: frame.clone() };
    let bytes = serde_json::to_vec(&routed).map_err(|_| ())?;
    let subject = format!("pod:{owner_instance}:commands");
    client.publish(subject, bytes.into()).await.map_err(|_| ())
}

/// Subscribe to this replica's own `pod:{instance_id}:commands` subject and
/// deliver every received frame to the local agent it names.
fn spawn_command_inbox(state: Arc<ControlPlaneState>) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_command_inbox(state, shutdown).await {
            warn!(err = %e, "command inbox stopped");
        }
    });
}

async fn run_command_inbox(
    state: Arc<ControlPlaneState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let Some(client) = state.nats_client.read().await.clone() else {
        return Ok(());
    };
    let subject = format!("pod:{}:commands", state.instance_id);
    let mut sub = client.subscribe(subject).await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = sub.next() => {
                let Some(msg) = msg else { break };
                match serde_json::from_slice::<RoutedCommand>(&msg.payload) {
                    Ok(routed) => {
                        if crate::agent_hub::send_local(&state, &routed.agent_id, routed.message).await.is_err() {
                            warn!(agent_id = %routed.agent_id, "routed command arrived for an agent not connected here");
                        }
                    }
                    Err(e) => warn!(err = %e, "dropping malformed routed command"),
                }
            }
        }
    }
    Ok(())
}

fn spawn_lifecycle_forwarder(state: Arc<ControlPlaneState>, nats_url: String) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_lifecycle_forwarder(state, shutdown).await {
            warn!(err = %e, url = %nats_url, "lifecycle forwarder stopped");
        }
    });
}

async fn run_lifecycle_forwarder(
    state: Arc<ControlPlaneState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let Some(client) = state.nats_client.read().await.clone() else {
        return Ok(());
    };
    let mut events = state.broadcasts.lifecycle_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                match event {
                    Ok(event) => publish_lifecycle_event(&client, &event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("lifecycle forwarder lagged {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    Ok(())
}

async fn publish_lifecycle_event(client: &async_nats::Client, event: &LifecycleEvent) {
    let (subject_suffix, agent_id) = match event {
        LifecycleEvent::AgentOnline { agent_id } => ("online", agent_id),
        LifecycleEvent::AgentOffline { agent_id } => ("offline", agent_id),
    };
    let subject = format!("{ADVISORY_SUBJECT_PREFIX}.{agent_id}.{subject_suffix}");
    if let Ok(payload) = serde_json::to_vec(event) {
        if let Err(e) = client.publish(subject, payload.into()).await {
            warn!(err = %e, "failed to publish lifecycle event");
        }
    }
}
