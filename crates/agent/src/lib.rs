// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SessionHub agent runtime: register with the control plane, hold an
//! outbound WebSocket, and execute dispatched commands against a substrate
//! port. Leadership over a given `agent_id` is arbitrated by
//! `sessionhub-election` so exactly one replica holds the live connection.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod election;
pub mod error;
pub mod registration;
pub mod vnc;

use std::sync::Arc;

use sessionhub_election::ElectorState;
use sessionhub_substrate::container_daemon::ContainerDaemonSubstrate;
use sessionhub_substrate::orchestrator::OrchestratorSubstrate;
use sessionhub_substrate::SubstratePort;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{AgentConfig, SubstrateBackendKind};

pub async fn build_substrate(config: &AgentConfig) -> anyhow::Result<Arc<dyn SubstratePort>> {
    match config.substrate {
        SubstrateBackendKind::ContainerDaemon => {
            Ok(Arc::new(ContainerDaemonSubstrate::new(config.daemon_url.clone())))
        }
        SubstrateBackendKind::Orchestrator => {
            Ok(Arc::new(OrchestratorSubstrate::new(config.namespace.clone()).await?))
        }
    }
}

/// Run the agent runtime until `shutdown` fires.
///
/// Holds leadership over this `agent_id` via `sessionhub-election`; while
/// leader, runs the outbound connect/reconnect loop, and steps the
/// connection down (without exiting the process) the instant leadership is
/// lost, so a demoted replica is ready to resume the moment it is
/// re-elected.
pub async fn run(config: AgentConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let substrate = build_substrate(&config).await?;
    let elector = election::spawn(&config, shutdown.clone()).await?;
    let mut state_rx = elector.subscribe();

    while !shutdown.is_cancelled() {
        while *state_rx.borrow() != ElectorState::Leader {
            if *state_rx.borrow() == ElectorState::Stopped || shutdown.is_cancelled() {
                return Ok(());
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        info!(agent_id = %config.agent_id, "leadership acquired, starting connection loop");
        let connection_scope = shutdown.child_token();
        let mut demotion_watch = state_rx.clone();
        let demote_scope = connection_scope.clone();
        let watcher = tokio::spawn(async move {
            loop {
                if *demotion_watch.borrow() != ElectorState::Leader {
                    demote_scope.cancel();
                    return;
                }
                if demotion_watch.changed().await.is_err() {
                    demote_scope.cancel();
                    return;
                }
            }
        });

        connection::run(Arc::clone(&config), Arc::clone(&substrate), connection_scope).await;
        watcher.abort();
        info!(agent_id = %config.agent_id, "connection loop stopped, awaiting leadership");
    }

    Ok(())
}
