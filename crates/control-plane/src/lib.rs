// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SessionHub control plane: Agent Hub, Command Dispatcher, VNC Proxy, and
//! Broadcast Fabric behind a single axum server, coordinated across replicas
//! via shared NATS/JetStream state and leader election.

pub mod agent_hub;
pub mod broadcast;
pub mod client_registry;
pub mod config;
pub mod dispatcher;
pub mod durable;
pub mod election;
pub mod error;
pub mod log_layer;
pub mod shared_state;
pub mod state;
pub mod transport;
pub mod vnc;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ControlPlaneConfig;
use crate::state::ControlPlaneState;

/// Construct the shared state up front, before logging is wired, so
/// `main` can register [`log_layer::LogBroadcastLayer`] against its
/// `broadcast::Sender` before any log line is emitted.
pub fn build_state(config: ControlPlaneConfig) -> Arc<ControlPlaneState> {
    let shutdown = CancellationToken::new();
    Arc::new(ControlPlaneState::new(config, shutdown))
}

/// Run the control-plane server until shutdown.
pub async fn run(config: ControlPlaneConfig) -> anyhow::Result<()> {
    run_with_state(build_state(config)).await
}

/// Run the control-plane server against an already-constructed state.
pub async fn run_with_state(state: Arc<ControlPlaneState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let config = state.config.clone();
    let shutdown = state.shutdown.clone();

    if let Err(e) = shared_state::connect(&state, &config).await {
        tracing::warn!(err = %e, "shared state unavailable, continuing without cross-instance coordination");
    }

    let _elector = election::spawn(&state).await.ok();
    spawn_signal_handler(shutdown.clone());

    agent_hub::spawn_stale_sweep(Arc::clone(&state));
    dispatcher::spawn_gc(Arc::clone(&state));
    vnc::spawn_idle_sweep(Arc::clone(&state));
    broadcast::spawn_sessions_producer(Arc::clone(&state));
    broadcast::spawn_metrics_producer(Arc::clone(&state));

    info!(%addr, "sessionhub control plane listening");
    let router = transport::build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// First SIGTERM/SIGINT triggers graceful shutdown; a second forces exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
