// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use sessionhub_control_plane::config::ControlPlaneConfig;
use sessionhub_control_plane::log_layer::LogBroadcastLayer;
use tracing::error;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    let config = ControlPlaneConfig::parse();
    let state = sessionhub_control_plane::build_state(config);

    let fmt_layer = tracing_subscriber::fmt::layer().json();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let log_broadcast = LogBroadcastLayer::new(state.broadcasts.logs_tx.clone());
    tracing_subscriber::registry().with(filter).with(fmt_layer).with(log_broadcast).init();

    if let Err(e) = sessionhub_control_plane::run_with_state(state).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
