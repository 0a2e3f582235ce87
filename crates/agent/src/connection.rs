// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound connect / reconnect loop: register, dial, run the read/write/
//! heartbeat loops until the socket drops, then back off and try again.
//!
//! On any read or write failure the socket is dropped and the whole cycle
//! (re-register, re-dial) restarts after a bounded exponential backoff,
//! reset to its initial value the moment a connection succeeds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sessionhub_protocol::{iso8601_now, AgentFrame, HubFrame};
use sessionhub_substrate::SubstratePort;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::dispatch;
use crate::registration;
use crate::vnc::VncTunnels;

/// Agent-reported `active_sessions`, updated by [`dispatch::handle_command`]
/// as `start_session`/`stop_session` commands complete.
#[derive(Clone, Default)]
pub struct SessionCounter(Arc<AtomicU32>);

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run the outbound-connect/reconnect loop until `shutdown` fires.
pub async fn run(config: Arc<AgentConfig>, substrate: Arc<dyn SubstratePort>, shutdown: CancellationToken) {
    let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().unwrap_or_default();
    let tunnels = VncTunnels::new();
    let sessions = SessionCounter::new();
    let backoff = config.reconnect_backoff();
    let mut backoff_idx = 0usize;

    while !shutdown.is_cancelled() {
        let ack = match registration::register(&http, &config).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(error = %e, "agent registration failed, retrying");
                sleep_or_shutdown(backoff[backoff_idx], &shutdown).await;
                backoff_idx = (backoff_idx + 1).min(backoff.len() - 1);
                continue;
            }
        };

        let url = build_ws_url(&config);
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                info!(agent_id = %config.agent_id, "connected to control plane");
                backoff_idx = 0;
                run_connection(
                    stream,
                    &config,
                    &substrate,
                    &tunnels,
                    &sessions,
                    ack.heartbeat_interval_secs,
                    &shutdown,
                )
                .await;
                debug!(agent_id = %config.agent_id, "connection loop exited");
            }
            Err(e) => {
                warn!(error = %e, "websocket dial failed, retrying");
            }
        }

        if shutdown.is_cancelled() {
            break;
        }
        sleep_or_shutdown(backoff[backoff_idx], &shutdown).await;
        backoff_idx = (backoff_idx + 1).min(backoff.len() - 1);
    }
}

async fn sleep_or_shutdown(delay: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.cancelled() => {}
    }
}

fn build_ws_url(config: &AgentConfig) -> String {
    let ws_base = if config.control_plane_url.starts_with("https://") {
        config.control_plane_url.replacen("https://", "wss://", 1)
    } else {
        config.control_plane_url.replacen("http://", "ws://", 1)
    };
    let mut url = format!(
        "{}/api/v1/agents/connect?agent_id={}&org_id={}&capacity={}",
        ws_base.trim_end_matches('/'),
        config.agent_id,
        config.org_id,
        config.capacity,
    );
    if let Some(token) = &config.auth_token {
        url.push_str(&format!("&token={token}"));
    }
    url
}

async fn run_connection(
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    config: &AgentConfig,
    substrate: &Arc<dyn SubstratePort>,
    tunnels: &VncTunnels,
    sessions: &SessionCounter,
    heartbeat_interval_secs: u64,
    shutdown: &CancellationToken,
) {
    let (mut sink, mut stream) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<AgentFrame>();
    let connection_scope = shutdown.child_token();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else { continue };
            let send = tokio::time::timeout(Duration::from_secs(10), sink.send(Message::Text(json.into())));
            match send.await {
                Ok(Ok(())) => {}
                _ => break,
            }
        }
    });

    let heartbeat_tx = outbound_tx.clone();
    let heartbeat_capacity = config.capacity;
    let heartbeat_sessions = sessions.clone();
    let heartbeat_scope = connection_scope.clone();
    let heartbeat = tokio::spawn(async move {
        let interval = Duration::from_secs(heartbeat_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = heartbeat_scope.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let frame = AgentFrame::Heartbeat {
                        active_sessions: heartbeat_sessions.get(),
                        capacity: heartbeat_capacity,
                        ts: iso8601_now(),
                    };
                    if heartbeat_tx.send(frame).is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<HubFrame>(&text) else {
                            warn!("dropping malformed hub frame");
                            continue;
                        };
                        if !handle_hub_frame(frame, substrate, tunnels, sessions, &outbound_tx).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("control plane closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    connection_scope.cancel();
    writer.abort();
    heartbeat.abort();
}

/// Handle one inbound [`HubFrame`]. Returns `false` when the connection
/// should be torn down (a `shutdown` frame from the control plane).
async fn handle_hub_frame(
    frame: HubFrame,
    substrate: &Arc<dyn SubstratePort>,
    tunnels: &VncTunnels,
    sessions: &SessionCounter,
    outbound: &mpsc::UnboundedSender<AgentFrame>,
) -> bool {
    match frame {
        HubFrame::Command { command } => {
            dispatch::handle_command(substrate.as_ref(), tunnels, sessions, outbound, command).await;
            true
        }
        HubFrame::Ping {} => {
            let _ = outbound.send(AgentFrame::Pong {});
            true
        }
        HubFrame::Shutdown { reason } => {
            info!(%reason, "control plane requested shutdown of this connection");
            false
        }
        HubFrame::VncData { tunnel_id, data } => {
            tunnels.relay_inbound(&tunnel_id, &data).await;
            true
        }
    }
}
