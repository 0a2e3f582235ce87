// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent runtime configuration, parsed via `clap::Parser` in `main.rs`.

use std::time::Duration;

use clap::{Args, ValueEnum};

#[derive(Debug, Args, Clone)]
pub struct AgentConfig {
    /// Logical agent identity; shared across every replica racing for
    /// leadership over this agent's live connection.
    #[arg(long, env = "SESSIONHUB_AGENT_ID")]
    pub agent_id: String,

    /// Tenant this agent's sessions belong to, reported at registration and
    /// carried on every connection so the control plane can scope broadcasts.
    #[arg(long, env = "SESSIONHUB_ORG_ID")]
    pub org_id: String,

    /// Host this agent runs on, reported at registration time.
    #[arg(long, env = "SESSIONHUB_AGENT_HOST", default_value = "localhost")]
    pub host: String,

    /// Declared maximum concurrent sessions.
    #[arg(long, env = "SESSIONHUB_AGENT_CAPACITY", default_value_t = 4)]
    pub capacity: u32,

    /// Base URL of the control plane, e.g. `https://control-plane:8080`.
    #[arg(long, env = "SESSIONHUB_CONTROL_PLANE_URL")]
    pub control_plane_url: String,

    /// Bearer token presented on registration and the WebSocket dial.
    #[arg(long, env = "SESSIONHUB_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Cap on the exponential reconnect backoff, in seconds.
    #[arg(long, env = "SESSIONHUB_RECONNECT_MAX_SECS", default_value_t = 60)]
    pub reconnect_max_secs: u64,

    /// Substrate backend this agent drives.
    #[arg(long, value_enum, env = "SESSIONHUB_SUBSTRATE", default_value_t = SubstrateBackendKind::ContainerDaemon)]
    pub substrate: SubstrateBackendKind,

    /// Base URL of the local container daemon (container-daemon substrate only).
    #[arg(long, env = "SESSIONHUB_DAEMON_URL", default_value = "http://localhost:2375")]
    pub daemon_url: String,

    /// Kubernetes namespace to run session pods in (orchestrator substrate only).
    #[arg(long, env = "SESSIONHUB_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Leader-election backend gating which replica owns this `agent_id`.
    #[arg(long, value_enum, env = "SESSIONHUB_ELECTION_BACKEND", default_value_t = ElectionBackendKind::FileLock)]
    pub election_backend: ElectionBackendKind,

    #[arg(long, env = "SESSIONHUB_ELECTION_LOCK_PATH", default_value = "/tmp/sessionhub/agent.lock")]
    pub election_lock_path: String,

    #[arg(long, env = "SESSIONHUB_NATS_URL")]
    pub nats_url: Option<String>,

    #[arg(long, env = "SESSIONHUB_NATS_KV_BUCKET", default_value = "sessionhub")]
    pub kv_bucket: String,

    /// This replica's own identity, used as the election holder ID and as
    /// the `instance_id` reported in shared-state advisory keys.
    #[arg(long, env = "SESSIONHUB_INSTANCE_ID")]
    pub instance_id: Option<String>,
}

impl AgentConfig {
    pub fn reconnect_backoff(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut secs = 1u64;
        loop {
            delays.push(Duration::from_secs(secs));
            if secs >= self.reconnect_max_secs {
                break;
            }
            secs = (secs * 2).min(self.reconnect_max_secs);
        }
        delays
    }

    pub fn instance_id(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| format!("{}-{}", self.agent_id, std::process::id()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SubstrateBackendKind {
    ContainerDaemon,
    Orchestrator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ElectionBackendKind {
    FileLock,
    SharedKv,
    OrchestratorLabel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AgentConfig {
        AgentConfig {
            agent_id: "agent-1".into(),
            org_id: "org-1".into(),
            host: "localhost".into(),
            capacity: 4,
            control_plane_url: "http://localhost:8080".into(),
            auth_token: None,
            reconnect_max_secs: 60,
            substrate: SubstrateBackendKind::ContainerDaemon,
            daemon_url: "http://localhost:2375".into(),
            namespace: "default".into(),
            election_backend: ElectionBackendKind::FileLock,
            election_lock_path: "/tmp/sessionhub/agent.lock".into(),
            nats_url: None,
            kv_bucket: "sessionhub".into(),
            instance_id: None,
        }
    }

    #[test]
    fn reconnect_backoff_doubles_up_to_the_cap() {
        let config = base_config();
        let delays = config.reconnect_backoff();
        assert_eq!(
            delays,
            vec![1, 2, 4, 8, 16, 32, 60].into_iter().map(Duration::from_secs).collect::<Vec<_>>()
        );
    }

    #[test]
    fn instance_id_falls_back_to_agent_id_and_pid() {
        let config = base_config();
        assert!(config.instance_id().starts_with("agent-1-"));
    }
}
