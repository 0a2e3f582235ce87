// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side half of the VNC Proxy: on `create_vnc_tunnel`, resolve the
//! session's VNC port, establish a local port-forward, and relay bytes
//! between that port-forward's TCP socket and the control plane's
//! `vnc_data` frames (base64-encoded inside JSON, per the wire contract).

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use sessionhub_protocol::AgentFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sessionhub_substrate::{PortForward, SubstrateError, SubstratePort};

struct TunnelHandle {
    to_socket: mpsc::UnboundedSender<Vec<u8>>,
    relay_task: JoinHandle<()>,
    _port_forward: PortForward,
}

/// Live VNC tunnels this agent is relaying, keyed by the control plane's
/// `tunnel_id`.
#[derive(Clone, Default)]
pub struct VncTunnels {
    inner: Arc<Mutex<HashMap<String, TunnelHandle>>>,
}

impl VncTunnels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the session's VNC port, establish a port-forward, connect to
    /// it locally, and start relaying. Returns once the local connection is
    /// up and ready to receive `vnc_data` frames.
    pub async fn open(
        &self,
        substrate: &dyn SubstratePort,
        outbound: mpsc::UnboundedSender<AgentFrame>,
        session_id: &str,
        tunnel_id: &str,
    ) -> Result<(), SubstrateError> {
        let remote_port = substrate.resolve_vnc_port(session_id).await?;
        let port_forward = substrate.establish_port_forward(session_id, remote_port).await?;
        let socket = TcpStream::connect(("127.0.0.1", port_forward.local_port))
            .await
            .map_err(|e| SubstrateError::PortForwardFailed(e.to_string()))?;

        let (mut read_half, mut write_half) = socket.into_split();
        let (to_socket_tx, mut to_socket_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let tunnel_id_owned = tunnel_id.to_owned();

        let relay_task = tokio::spawn(async move {
            let mut buf = vec![0u8; sessionhub_protocol::constants::VNC_MAX_CHUNK_BYTES];
            loop {
                tokio::select! {
                    read = read_half.read(&mut buf) => {
                        match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                let data = base64::engine::general_purpose::STANDARD.encode(&buf[..n]);
                                let frame = AgentFrame::VncData { tunnel_id: tunnel_id_owned.clone(), data };
                                if outbound.send(frame).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    chunk = to_socket_rx.recv() => {
                        match chunk {
                            Some(bytes) => {
                                if write_half.write_all(&bytes).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!(tunnel_id = %tunnel_id_owned, "vnc relay closed");
        });

        let handle = TunnelHandle { to_socket: to_socket_tx, relay_task, _port_forward: port_forward };
        self.inner.lock().await.insert(tunnel_id.to_owned(), handle);
        Ok(())
    }

    /// Forward a base64 chunk received from the control plane into the
    /// tunnel's local socket.
    pub async fn relay_inbound(&self, tunnel_id: &str, data: &str) {
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) else {
            warn!(tunnel_id, "dropping malformed vnc_data chunk");
            return;
        };
        if let Some(handle) = self.inner.lock().await.get(tunnel_id) {
            let _ = handle.to_socket.send(bytes);
        }
    }

    pub async fn close(&self, tunnel_id: &str) {
        if let Some(handle) = self.inner.lock().await.remove(tunnel_id) {
            handle.relay_task.abort();
        }
    }
}
