// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast Fabric: periodic snapshot producers feeding `/ws/sessions` and
//! `/ws/metrics`. Each snapshot is scoped to one tenant and fanned out only
//! to that tenant's subscribers via [`crate::client_registry::ClientRegistry`]
//! — a client belonging to `org_id` "a" never receives a snapshot computed
//! for "b". Slow or disconnected subscribers are evicted by the registry
//! rather than allowed to back up delivery to everyone else.

use std::sync::Arc;

use tracing::debug;

use crate::state::{AgentEntry, AgentSummary, ControlPlaneState, MetricsSnapshot, SessionsSnapshot};

/// Spawn the periodic `/ws/sessions` snapshot producer.
pub fn spawn_sessions_producer(state: Arc<ControlPlaneState>) {
    let interval = state.config.sessions_broadcast_interval();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            for org_id in state.broadcasts.sessions.active_orgs().await {
                let snapshot = sessions_snapshot(&state, &org_id).await;
                state.broadcasts.sessions.fan_out_scoped(&org_id, snapshot).await;
            }
        }
    });
}

/// Spawn the periodic `/ws/metrics` snapshot producer.
pub fn spawn_metrics_producer(state: Arc<ControlPlaneState>) {
    let interval = state.config.metrics_broadcast_interval();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            for org_id in state.broadcasts.metrics.active_orgs().await {
                let snapshot = metrics_snapshot(&state, &org_id).await;
                state.broadcasts.metrics.fan_out_scoped(&org_id, snapshot).await;
            }
        }
    });
}

async fn org_agents(state: &ControlPlaneState, org_id: &str) -> Vec<Arc<AgentEntry>> {
    state.agents.read().await.values().filter(|a| a.org_id == org_id).cloned().collect()
}

async fn sessions_snapshot(state: &ControlPlaneState, org_id: &str) -> SessionsSnapshot {
    let agents = org_agents(state, org_id)
        .await
        .into_iter()
        .map(|a| AgentSummary {
            agent_id: a.id.clone(),
            capacity: a.capacity,
            connected_secs: a.connected_at.elapsed().as_secs(),
        })
        .collect();
    SessionsSnapshot { agents }
}

async fn metrics_snapshot(state: &ControlPlaneState, org_id: &str) -> MetricsSnapshot {
    let org_agent_ids: std::collections::HashSet<String> =
        org_agents(state, org_id).await.into_iter().map(|a| a.id.clone()).collect();
    let connected_agents = org_agent_ids.len();
    let pending_commands = state
        .commands
        .read()
        .await
        .values()
        .filter(|r| org_agent_ids.contains(&r.agent_id) && !r.status.is_terminal())
        .count();
    let active_tunnels =
        state.tunnels.read().await.values().filter(|t| org_agent_ids.contains(&t.agent_id)).count();
    debug!(org_id, connected_agents, pending_commands, active_tunnels, "metrics snapshot");
    MetricsSnapshot { connected_agents, pending_commands, active_tunnels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_hub::connect;
    use crate::config::ControlPlaneConfig;
    use tokio_util::sync::CancellationToken;

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
    async fn sessions_snapshot_reflects_connected_agents_of_the_same_org() {
        let state = test_state();
        let (_entry, _rx) = connect(&state, "agent-1".into(), 3, "org-a".into()).await;
        let (_entry2, _rx2) = connect(&state, "agent-2".into(), 1, "org-b".into()).await;

        let snapshot = sessions_snapshot(&state, "org-a").await;
        assert_eq!(snapshot.agents.len(), 1);
        assert_eq!(snapshot.agents[0].capacity, 3);
    }

    #[tokio::test]
    async fn metrics_snapshot_counts_zero_on_empty_state() {
        let state = test_state();
        let snapshot = metrics_snapshot(&state, "org-a").await;
        assert_eq!(snapshot.connected_agents, 0);
        assert_eq!(snapshot.pending_commands, 0);
        assert_eq!(snapshot.active_tunnels, 0);
    }
}
