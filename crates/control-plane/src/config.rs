// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the control-plane server.
#[derive(Debug, Clone, clap::Args)]
pub struct ControlPlaneConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "SESSIONHUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9800, env = "SESSIONHUB_PORT")]
    pub port: u16,

    /// Bearer token for operator-facing API auth. If unset, auth is disabled.
    #[arg(long, env = "SESSIONHUB_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// HMAC signing key for VNC access tokens.
    #[arg(long, env = "SESSIONHUB_VNC_SIGNING_KEY")]
    pub vnc_signing_key: Option<String>,

    /// Heartbeat interval expected from connected agents, in seconds.
    #[arg(long, default_value_t = 15, env = "SESSIONHUB_HEARTBEAT_SECS")]
    pub heartbeat_secs: u64,

    /// Seconds of silence before an agent is considered stale and evicted.
    #[arg(long, default_value_t = 45, env = "SESSIONHUB_STALE_SECS")]
    pub stale_secs: u64,

    /// Interval between stale-agent sweeps, in seconds.
    #[arg(long, default_value_t = 10, env = "SESSIONHUB_SWEEP_SECS")]
    pub sweep_secs: u64,

    /// How long a completed or failed command record is retained, in seconds.
    #[arg(long, default_value_t = 300, env = "SESSIONHUB_COMMAND_RETENTION_SECS")]
    pub command_retention_secs: u64,

    /// Idle timeout for an established VNC tunnel with no traffic, in seconds.
    #[arg(long, default_value_t = 600, env = "SESSIONHUB_VNC_IDLE_SECS")]
    pub vnc_idle_secs: u64,

    /// Broadcast snapshot interval for `/ws/sessions`, in milliseconds.
    #[arg(long, default_value_t = 3000, env = "SESSIONHUB_SESSIONS_BROADCAST_MS")]
    pub sessions_broadcast_ms: u64,

    /// Broadcast snapshot interval for `/ws/metrics`, in milliseconds.
    #[arg(long, default_value_t = 5000, env = "SESSIONHUB_METRICS_BROADCAST_MS")]
    pub metrics_broadcast_ms: u64,

    /// NATS server URL used for cross-instance shared state and pub/sub.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "SESSIONHUB_NATS_URL")]
    pub nats_url: String,

    /// JetStream KV bucket holding agent-connection advisory keys and election leases.
    #[arg(long, default_value = "sessionhub", env = "SESSIONHUB_KV_BUCKET")]
    pub kv_bucket: String,

    /// Logical task identity of this control-plane replica, used for leader election.
    #[arg(long, env = "SESSIONHUB_TASK_ID")]
    pub task_id: Option<String>,

    /// Which leader-election backend to use for cross-replica advisory cleanup.
    #[arg(long, value_enum, default_value_t = ElectionBackendKind::FileLock, env = "SESSIONHUB_ELECTION_BACKEND")]
    pub election_backend: ElectionBackendKind,

    /// Advisory lock file path, used only by the file-lock election backend.
    #[arg(
        long,
        default_value = "/tmp/sessionhub/control-plane.lock",
        env = "SESSIONHUB_ELECTION_LOCK_PATH"
    )]
    pub election_lock_path: std::path::PathBuf,

    /// Namespace of the Service object used by the orchestrator-label election backend.
    #[arg(long, default_value = "default", env = "SESSIONHUB_ELECTION_NAMESPACE")]
    pub election_namespace: String,

    /// Name of the Service object used by the orchestrator-label election backend.
    #[arg(long, default_value = "sessionhub-control-plane", env = "SESSIONHUB_ELECTION_SERVICE")]
    pub election_service_name: String,
}

/// Selects which [`sessionhub_election`] backend guards this replica's
/// cluster-wide advisory cleanup task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ElectionBackendKind {
    FileLock,
    SharedKv,
    OrchestratorLabel,
}

impl ControlPlaneConfig {
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_secs)
    }

    pub fn stale_threshold(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stale_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_secs)
    }

    pub fn command_retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_retention_secs)
    }

    pub fn vnc_idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.vnc_idle_secs)
    }

    pub fn sessions_broadcast_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sessions_broadcast_ms)
    }

    pub fn metrics_broadcast_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.metrics_broadcast_ms)
    }
}
