// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sessionhub_election::Elector;
use sessionhub_protocol::{CommandAction, HubFrame};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client_registry::ClientRegistry;
use crate::config::ControlPlaneConfig;

/// Shared control-plane state.
pub struct ControlPlaneState {
    pub agents: RwLock<HashMap<String, Arc<AgentEntry>>>,
    pub commands: RwLock<HashMap<Uuid, CommandRecord>>,
    pub tunnels: RwLock<HashMap<String, Arc<TunnelRecord>>>,
    /// Index from an in-flight session's ID to the agent hosting it,
    /// populated by the dispatcher whenever a command carries a session ID.
    /// Used to derive VNC tunnel ownership from the session rather than
    /// trusting a client-supplied agent ID.
    pub sessions: RwLock<HashMap<String, String>>,
    pub config: ControlPlaneConfig,
    pub shutdown: CancellationToken,
    /// Cross-instance NATS client, set once the shared-state connector comes up.
    pub nats_client: RwLock<Option<async_nats::Client>>,
    pub broadcasts: BroadcastHub,
    /// This replica's cluster-leadership elector, set once `election::spawn`
    /// comes up; read by `/health` to report `leader_state`.
    pub elector: RwLock<Option<Arc<Elector>>>,
    pub started_at: Instant,
    /// This replica's own identity: the election holder ID, the shared-state
    /// ownership-advisory value, and the NATS subject suffix commands
    /// forwarded from a sibling replica are published to.
    pub instance_id: String,
}

impl ControlPlaneState {
    pub fn new(config: ControlPlaneConfig, shutdown: CancellationToken) -> Self {
        let instance_id =
            config.task_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            agents: RwLock::new(HashMap::new()),
            commands: RwLock::new(HashMap::new()),
            tunnels: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            config,
            shutdown,
            nats_client: RwLock::new(None),
            broadcasts: BroadcastHub::new(),
            elector: RwLock::new(None),
            started_at: Instant::now(),
            instance_id,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Register a newly-connected agent, replacing any prior entry with the same ID.
    pub async fn register_agent(&self, entry: Arc<AgentEntry>) {
        let id = entry.id.clone();
        if let Some(prev) = self.agents.write().await.insert(id.clone(), entry) {
            prev.cancel.cancel();
        }
        let _ = self.broadcasts.lifecycle_tx.send(LifecycleEvent::AgentOnline { agent_id: id.clone() });
        crate::durable::persist_agent_status(self, &id, true).await;
        let _ = crate::shared_state::advertise_owner(self, &id, &self.instance_id).await;
    }

    /// Remove an agent and cancel its background tasks.
    pub async fn remove_agent(&self, agent_id: &str) {
        if let Some(entry) = self.agents.write().await.remove(agent_id) {
            entry.cancel.cancel();
            let _ = self
                .broadcasts
                .lifecycle_tx
                .send(LifecycleEvent::AgentOffline { agent_id: agent_id.to_owned() });
            crate::durable::persist_agent_status(self, agent_id, false).await;
            crate::shared_state::clear_owner(self, agent_id).await;
        }
    }

    /// Record which agent hosts a session, so a later VNC dial can derive
    /// ownership from the session ID instead of trusting a client-supplied
    /// agent ID.
    pub async fn record_session_owner(&self, session_id: &str, agent_id: &str) {
        if session_id.is_empty() {
            return;
        }
        self.sessions.write().await.insert(session_id.to_owned(), agent_id.to_owned());
    }

    pub async fn session_owner(&self, session_id: &str) -> Option<String> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn agent(&self, agent_id: &str) -> Option<Arc<AgentEntry>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Remove agents whose last heartbeat predates the configured stale threshold.
    pub async fn sweep_stale_agents(&self) -> Vec<String> {
        let threshold = self.config.stale_threshold();
        let now = Instant::now();
        let stale: Vec<String> = {
            let agents = self.agents.read().await;
            agents
                .values()
                .filter(|a| now.duration_since(a.last_heartbeat()) > threshold)
                .map(|a| a.id.clone())
                .collect()
        };
        for id in &stale {
            self.remove_agent(id).await;
        }
        stale
    }

    /// Drop command records older than the configured retention window that
    /// have already reached a terminal state.
    pub async fn gc_commands(&self) -> usize {
        let retention = self.config.command_retention();
        let now = Instant::now();
        let mut commands = self.commands.write().await;
        let before = commands.len();
        commands.retain(|_, record| {
            !record.status.is_terminal()
                || record.completed_at.is_none_or(|t| now.duration_since(t) < retention)
        });
        before - commands.len()
    }
}

/// A connected execution agent.
pub struct AgentEntry {
    pub id: String,
    pub capacity: u32,
    /// Tenant this agent belongs to; every broadcast concerning this agent is
    /// scoped to this value.
    pub org_id: String,
    pub connected_at: Instant,
    pub tx: mpsc::UnboundedSender<HubFrame>,
    pub cancel: CancellationToken,
    last_heartbeat_ms: AtomicU64,
}

impl AgentEntry {
    pub fn new(
        id: String,
        capacity: u32,
        org_id: String,
        tx: mpsc::UnboundedSender<HubFrame>,
        cancel: CancellationToken,
    ) -> Self {
        let connected_at = Instant::now();
        Self { id, capacity, org_id, connected_at, tx, cancel, last_heartbeat_ms: AtomicU64::new(0) }
    }

    pub fn record_heartbeat(&self) {
        self.last_heartbeat_ms.store(elapsed_ms(self.connected_at), Ordering::Relaxed);
    }

    pub fn last_heartbeat(&self) -> Instant {
        let elapsed = self.last_heartbeat_ms.load(Ordering::Relaxed);
        self.connected_at + std::time::Duration::from_millis(elapsed)
    }

    pub fn send(&self, frame: HubFrame) -> Result<(), mpsc::error::SendError<HubFrame>> {
        self.tx.send(frame)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    Instant::now().saturating_duration_since(since).as_millis() as u64
}

/// Lifecycle status of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Record of a command dispatched to an agent, tracked for ack/complete/fail
/// correlation and for redelivery after an agent reconnects.
#[derive(Clone)]
pub struct CommandRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub action: CommandAction,
    pub status: CommandStatus,
    pub created_at: Instant,
    pub completed_at: Option<Instant>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl CommandRecord {
    pub fn new(id: Uuid, agent_id: String, action: CommandAction) -> Self {
        Self {
            id,
            agent_id,
            action,
            status: CommandStatus::Pending,
            created_at: Instant::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// A live VNC tunnel between a browser client and a session's display.
pub struct TunnelRecord {
    pub token: String,
    pub session_id: String,
    pub agent_id: String,
    pub created_at: Instant,
    last_activity_ms: AtomicU64,
    pub cancel: CancellationToken,
    /// Base64 VNC chunks relayed from the agent, forwarded to the browser
    /// socket task that created this tunnel.
    pub to_browser: mpsc::UnboundedSender<String>,
}

impl TunnelRecord {
    pub fn new(
        token: String,
        session_id: String,
        agent_id: String,
        cancel: CancellationToken,
        to_browser: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            token,
            session_id,
            agent_id,
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            cancel,
            to_browser,
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(elapsed_ms(self.created_at), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> std::time::Duration {
        let last = self.created_at
            + std::time::Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        Instant::now().saturating_duration_since(last)
    }
}

/// Snapshot of agent/session state broadcast to `/ws/sessions` subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsSnapshot {
    pub agents: Vec<AgentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub capacity: u32,
    pub connected_secs: u64,
}

/// Snapshot broadcast to `/ws/metrics` subscribers, scoped to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connected_agents: usize,
    pub pending_commands: usize,
    pub active_tunnels: usize,
}

/// Lifecycle event fed to the `/ws/sessions` side channel between snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    AgentOnline { agent_id: String },
    AgentOffline { agent_id: String },
}

/// Broadcast/fan-out channels feeding the Broadcast Fabric's WebSocket
/// endpoints. `/ws/sessions` and `/ws/metrics` are scoped per tenant via
/// [`ClientRegistry`] — a client only ever receives snapshots for the
/// `org_id` it subscribed as. `/ws/logs` carries operator-facing server logs,
/// which aren't tenant data, so it stays a plain broadcast.
pub struct BroadcastHub {
    pub sessions: ClientRegistry<SessionsSnapshot>,
    pub metrics: ClientRegistry<MetricsSnapshot>,
    pub lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    pub logs_tx: broadcast::Sender<Arc<str>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (lifecycle_tx, _) = broadcast::channel(256);
        let (logs_tx, _) = broadcast::channel(512);
        Self {
            sessions: ClientRegistry::new(),
            metrics: ClientRegistry::new(),
            lifecycle_tx,
            logs_tx,
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_state() -> ControlPlaneState {
        ControlPlaneState::new(test_config(), CancellationToken::new())
    }

    fn test_config() -> ControlPlaneConfig {
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
        }
    }

    #[tokio::test]
    async fn register_then_remove_agent_round_trips() {
        let state = new_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let entry =
            Arc::new(AgentEntry::new("agent-1".into(), 4, "org-1".into(), tx, CancellationToken::new()));
        state.register_agent(entry).await;
        assert_eq!(state.agent_count().await, 1);

        state.remove_agent("agent-1").await;
        assert_eq!(state.agent_count().await, 0);
    }

    #[tokio::test]
    async fn sweep_stale_agents_evicts_silent_agents() {
        let state = new_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let entry =
            Arc::new(AgentEntry::new("agent-1".into(), 1, "org-1".into(), tx, CancellationToken::new()));
        // Never heartbeats: connected_at is "now", last_heartbeat defaults to
        // connected_at, so it isn't stale yet under the default threshold.
        state.register_agent(entry).await;
        let stale = state.sweep_stale_agents().await;
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn gc_commands_drops_only_terminal_and_expired() {
        let state = new_state();
        let id = Uuid::new_v4();
        let mut record = CommandRecord::new(id, "agent-1".into(), CommandAction::StartSession);
        record.status = CommandStatus::Completed;
        record.completed_at = Some(Instant::now() - std::time::Duration::from_secs(301));
        state.commands.write().await.insert(id, record);

        let removed = state.gc_commands().await;
        assert_eq!(removed, 1);
        assert!(state.commands.read().await.is_empty());
    }
}
