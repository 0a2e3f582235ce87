// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Dispatcher: turns an operator request into a command frame sent to
//! the target agent, and correlates the agent's ack/complete/fail replies
//! back to the originating record.

use sessionhub_protocol::{CommandAction, CommandPayload, HubFrame};
use tracing::warn;
use uuid::Uuid;

use crate::agent_hub;
use crate::error::SessionHubError;
use crate::state::{CommandRecord, CommandStatus, ControlPlaneState};

/// Dispatch a command to an agent. If the agent is not present anywhere —
/// not connected to this replica, and no sibling replica advertises owning
/// it either — the record is left `Pending` and `command_id` is still
/// returned so the caller can poll for it; at-least-once delivery means a
/// later reconnect or retry can still complete it, so this never reports
/// failure just because the agent is momentarily unreachable.
pub async fn dispatch(
    state: &ControlPlaneState,
    agent_id: &str,
    session_id: &str,
    action: CommandAction,
    payload: serde_json::Value,
) -> Result<Uuid, SessionHubError> {
    let command_id = Uuid::new_v4();
    let record = CommandRecord::new(command_id, agent_id.to_owned(), action);
    state.commands.write().await.insert(command_id, record.clone());
    state.record_session_owner(session_id, agent_id).await;
    crate::durable::persist_command(state, &record).await;

    let frame = HubFrame::Command {
        command: CommandPayload {
            command_id: command_id.to_string(),
            session_id: session_id.to_owned(),
            action,
            payload,
        },
    };

    if agent_hub::send(state, agent_id, frame).await.is_ok() {
        mark_dispatched(state, command_id).await;
    }

    Ok(command_id)
}

/// Record an agent's acknowledgement of a dispatched command.
pub async fn ack(state: &ControlPlaneState, command_id: Uuid) {
    mark_dispatched(state, command_id).await;
}

async fn mark_dispatched(state: &ControlPlaneState, command_id: Uuid) {
    let record = {
        let mut commands = state.commands.write().await;
        let Some(record) = commands.get_mut(&command_id) else { return };
        if record.status == CommandStatus::Pending {
            record.status = CommandStatus::Dispatched;
        }
        record.clone()
    };
    crate::durable::persist_command(state, &record).await;
}

/// Record successful completion of a command.
pub async fn complete(state: &ControlPlaneState, command_id: Uuid, result: serde_json::Value) {
    let record = {
        let mut commands = state.commands.write().await;
        let Some(record) = commands.get_mut(&command_id) else { return };
        record.status = CommandStatus::Completed;
        record.completed_at = Some(std::time::Instant::now());
        record.result = Some(result);
        record.clone()
    };
    crate::durable::persist_command(state, &record).await;
}

/// Record command failure reported by the agent.
pub async fn fail(state: &ControlPlaneState, command_id: Uuid, error: String) {
    mark_failed(state, command_id, &error).await;
}

async fn mark_failed(state: &ControlPlaneState, command_id: Uuid, error: &str) {
    let record = {
        let mut commands = state.commands.write().await;
        let Some(record) = commands.get_mut(&command_id) else { return };
        record.status = CommandStatus::Failed;
        record.completed_at = Some(std::time::Instant::now());
        record.error = Some(error.to_owned());
        record.clone()
    };
    crate::durable::persist_command(state, &record).await;
}

/// Look up the current status of a dispatched command.
pub async fn status(state: &ControlPlaneState, command_id: Uuid) -> Option<CommandStatus> {
    state.commands.read().await.get(&command_id).map(|r| r.status)
}

/// Redeliver every pending/dispatched command belonging to an agent that has
/// just reconnected, since in-flight commands from the previous connection
/// were lost along with the socket.
pub async fn redeliver_for_reconnect(state: &ControlPlaneState, agent_id: &str) {
    let pending: Vec<(Uuid, CommandAction, String)> = {
        let commands = state.commands.read().await;
        commands
            .values()
            .filter(|r| r.agent_id == agent_id && !r.status.is_terminal())
            .map(|r| (r.id, r.action, r.agent_id.clone()))
            .collect()
    };

    for (command_id, action, agent_id) in pending {
        let frame = HubFrame::Command {
            command: CommandPayload {
                command_id: command_id.to_string(),
                session_id: String::new(),
                action,
                payload: serde_json::Value::Null,
            },
        };
        if agent_hub::send(state, &agent_id, frame).await.is_ok() {
            mark_dispatched(state, command_id).await;
        } else {
            warn!(agent_id = %agent_id, %command_id, "redelivery failed: agent not connected");
        }
    }
}

/// Spawn the background sweep that drops expired terminal command records.
pub fn spawn_gc(state: std::sync::Arc<ControlPlaneState>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.config.command_retention() / 2);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            state.gc_commands().await;
        }
    });
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
    async fn dispatch_to_missing_agent_stays_pending() {
        let state = test_state();
        let command_id = dispatch(
            &state,
            "missing",
            "sess-1",
            CommandAction::StartSession,
            serde_json::Value::Null,
        )
        .await
        .expect("dispatch never fails outright, even to an unreachable agent");
        assert_eq!(status(&state, command_id).await, Some(CommandStatus::Pending));
    }

    #[tokio::test]
    async fn dispatch_ack_complete_round_trips_status() {
        let state = test_state();
        let (_entry, mut rx) = connect(&state, "agent-1".into(), 4, "org-1".into()).await;

        let command_id = dispatch(
            &state,
            "agent-1",
            "sess-1",
            CommandAction::StartSession,
            serde_json::json!({}),
        )
        .await
        .expect("dispatch");
        assert!(rx.recv().await.is_some());

        ack(&state, command_id).await;
        assert_eq!(status(&state, command_id).await, Some(CommandStatus::Dispatched));

        complete(&state, command_id, serde_json::json!({"ok": true})).await;
        assert_eq!(status(&state, command_id).await, Some(CommandStatus::Completed));
    }
}
