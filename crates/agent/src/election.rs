// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader election over this process's `agent_id`: when multiple replicas
//! are configured with the same agent, exactly one may hold the live
//! outbound connection at a time. Built the same way as the control
//! plane's cluster-leadership backend factory, just keyed per-agent rather
//! than per-cluster.

use std::sync::Arc;
use std::time::Duration;

use sessionhub_election::backend::{file_lock::FileLockBackend, orchestrator_label::OrchestratorLabelBackend};
use sessionhub_election::{Elector, ElectorConfig, LeaderElector};
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, ElectionBackendKind};

pub async fn build_backend(config: &AgentConfig) -> anyhow::Result<Arc<dyn LeaderElector>> {
    let holder_id = config.instance_id();
    match config.election_backend {
        ElectionBackendKind::FileLock => {
            Ok(Arc::new(FileLockBackend::new(config.election_lock_path.clone().into(), holder_id)))
        }
        ElectionBackendKind::SharedKv => {
            let url = config
                .nats_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--nats-url is required for the shared-kv election backend"))?;
            let backend = sessionhub_election::backend::shared_kv::SharedKvBackend::connect(
                &url,
                None,
                &config.kv_bucket,
                format!("agent.{}", config.agent_id),
                holder_id,
                Duration::from_secs(15),
            )
            .await?;
            Ok(Arc::new(backend))
        }
        ElectionBackendKind::OrchestratorLabel => {
            let backend = OrchestratorLabelBackend::new(
                &config.namespace,
                format!("agent-{}", config.agent_id),
                sessionhub_protocol::constants::ELECTION_LEASE_DURATION,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Build and start the elector's background renew/acquire loop. Returns the
/// handle so callers can `subscribe()` to leadership transitions.
pub async fn spawn(config: &AgentConfig, shutdown: CancellationToken) -> anyhow::Result<Arc<Elector>> {
    let backend = build_backend(config).await?;
    let elector = Arc::new(Elector::new(backend, ElectorConfig::default())?);
    tokio::spawn(Arc::clone(&elector).run(shutdown));
    Ok(elector)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(lock_path: std::path::PathBuf) -> AgentConfig {
        AgentConfig {
            agent_id: "agent-1".into(),
            org_id: "org-1".into(),
            host: "localhost".into(),
            capacity: 4,
            control_plane_url: "http://localhost:8080".into(),
            auth_token: None,
            reconnect_max_secs: 60,
            substrate: crate::config::SubstrateBackendKind::ContainerDaemon,
            daemon_url: "http://localhost:2375".into(),
            namespace: "default".into(),
            election_backend: ElectionBackendKind::FileLock,
            election_lock_path: lock_path.to_string_lossy().into_owned(),
            nats_url: None,
            kv_bucket: "sessionhub".into(),
            instance_id: Some("instance-a".into()),
        }
    }

    #[tokio::test]
    async fn file_lock_backend_builds_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = base_config(dir.path().join("agent.lock"));
        let backend = build_backend(&config).await.expect("build backend");
        assert!(backend.try_acquire().await.expect("acquire"));
    }
}
