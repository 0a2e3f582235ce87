// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent Hub: tracks connected execution agents, routes frames to them, and
//! evicts agents that stop heartbeating.

use std::sync::Arc;

use sessionhub_protocol::HubFrame;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::{AgentEntry, ControlPlaneState};

/// Register a newly-connected agent and return the sender it should use to
/// receive frames, plus a cancellation token scoped to its own connection.
pub async fn connect(
    state: &ControlPlaneState,
    agent_id: String,
    capacity: u32,
    org_id: String,
) -> (Arc<AgentEntry>, tokio::sync::mpsc::UnboundedReceiver<HubFrame>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = state.shutdown.child_token();
    let entry = Arc::new(AgentEntry::new(agent_id.clone(), capacity, org_id, tx, cancel));
    entry.record_heartbeat();
    state.register_agent(Arc::clone(&entry)).await;
    info!(agent_id = %agent_id, capacity, "agent connected");
    (entry, rx)
}

/// Handle an inbound heartbeat frame, resetting the agent's staleness clock.
pub async fn heartbeat(state: &ControlPlaneState, agent_id: &str) {
    if let Some(entry) = state.agent(agent_id).await {
        entry.record_heartbeat();
    }
}

/// Send a frame to a single agent. If the agent isn't connected to this
/// replica, checks the shared-state ownership advisory and forwards the
/// frame to the replica that does own its connection over NATS. Returns an
/// error only once every routing option is exhausted.
pub async fn send(state: &ControlPlaneState, agent_id: &str, frame: HubFrame) -> Result<(), ()> {
    if send_local(state, agent_id, frame.clone()).await.is_ok() {
        return Ok(());
    }
    match crate::shared_state::owner_of(state, agent_id).await {
        Some(owner_instance) if owner_instance != state.instance_id => {
            crate::shared_state::publish_command(state, &owner_instance, agent_id, &frame).await
        }
        _ => Err(()),
    }
}

/// Send a frame to an agent connected to *this* replica only. Used both by
/// [`send`]'s first attempt and by the command inbox that receives frames
/// forwarded from a sibling replica, where a further cross-instance hop would
/// just bounce the frame back and forth.
pub async fn send_local(state: &ControlPlaneState, agent_id: &str, frame: HubFrame) -> Result<(), ()> {
    let Some(entry) = state.agent(agent_id).await else { return Err(()) };
    entry.send(frame).map_err(|_| ())
}

/// Broadcast a frame to every connected agent.
pub async fn broadcast(state: &ControlPlaneState, frame: HubFrame) {
    let agents: Vec<_> = state.agents.read().await.values().cloned().collect();
    for entry in agents {
        let _ = entry.send(frame.clone());
    }
}

/// Spawn the background sweep that evicts agents past the stale threshold.
pub fn spawn_stale_sweep(state: Arc<ControlPlaneState>) {
    let interval = state.config.sweep_interval();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let evicted = state.sweep_stale_agents().await;
            for agent_id in evicted {
                warn!(agent_id = %agent_id, "evicting agent: heartbeat stale");
            }
        }
    });
}

/// Cancellation token scoping an agent's own connection lifetime, used by the
/// WebSocket handler to know when to close the socket from outside.
pub fn connection_scope(entry: &AgentEntry) -> CancellationToken {
    entry.cancel.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlPlaneConfig;

    fn test_state() -> ControlPlaneState {
        ControlPlaneState::new(
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
                election_backend: crate::config::ElectionBackendKind::FileLock,
                election_lock_path: "/tmp/sessionhub/control-plane.lock".into(),
                election_namespace: "default".into(),
                election_service_name: "sessionhub-control-plane".into(),
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn connect_then_send_delivers_frame() {
        let state = test_state();
        let (_entry, mut rx) = connect(&state, "agent-1".into(), 4, "org-1".into()).await;
        send(&state, "agent-1", HubFrame::Ping {}).await.expect("send");
        let frame = rx.recv().await.expect("frame");
        assert!(matches!(frame, HubFrame::Ping {}));
    }

    #[tokio::test]
    async fn send_to_unknown_agent_fails() {
        let state = test_state();
        let result = send(&state, "missing", HubFrame::Ping {}).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn heartbeat_keeps_agent_off_stale_sweep() {
        let state = test_state();
        let (_entry, _rx) = connect(&state, "agent-1".into(), 4, "org-1".into()).await;
        heartbeat(&state, "agent-1").await;
        let stale = state.sweep_stale_agents().await;
        assert!(stale.is_empty());
    }
}
