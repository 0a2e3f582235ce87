// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container-daemon substrate: sessions run as containers on the same host
//! as the agent, managed through a local container daemon's HTTP API (a
//! Docker-compatible Unix socket). Suited to single-host deployments with no
//! orchestrator.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use sessionhub_protocol::TemplateManifest;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};

use crate::{PortForward, SubstrateError, SubstratePort};

pub struct ContainerDaemonSubstrate {
    http: HttpClient,
    daemon_base_url: String,
    vnc_ports: RwLock<HashMap<String, u16>>,
}

impl ContainerDaemonSubstrate {
    pub fn new(daemon_base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            daemon_base_url: daemon_base_url.into(),
            vnc_ports: RwLock::new(HashMap::new()),
        }
    }

    fn container_url(&self, session_id: &str, op: &str) -> String {
        format!("{}/containers/{session_id}/{op}", self.daemon_base_url)
    }
}

#[async_trait]
impl SubstratePort for ContainerDaemonSubstrate {
    async fn start_session(
        &self,
        session_id: &str,
        manifest: &TemplateManifest,
    ) -> Result<(), SubstrateError> {
        let vnc_port =
            manifest.get("vnc_port").and_then(|v| v.as_u64()).unwrap_or(5900) as u16;

        let resp = self
            .http
            .post(format!("{}/containers/create?name={session_id}", self.daemon_base_url))
            .json(manifest)
            .send()
            .await
            .map_err(|e| SubstrateError::StartFailed(e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 409 {
            return Err(SubstrateError::StartFailed(format!("daemon returned {}", resp.status())));
        }

        self.http
            .post(self.container_url(session_id, "start"))
            .send()
            .await
            .map_err(|e| SubstrateError::StartFailed(e.to_string()))?;

        self.vnc_ports.write().await.insert(session_id.to_owned(), vnc_port);
        info!(session_id, vnc_port, "substrate: container started");
        Ok(())
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        self.vnc_ports.write().await.remove(session_id);
        let resp = self
            .http
            .post(self.container_url(session_id, "stop"))
            .send()
            .await
            .map_err(|e| SubstrateError::StopFailed(e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(SubstrateError::StopFailed(format!("daemon returned {}", resp.status())));
        }
        let _ = self
            .http
            .delete(format!("{}/containers/{session_id}", self.daemon_base_url))
            .send()
            .await;
        Ok(())
    }

    async fn hibernate_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        let resp = self
            .http
            .post(self.container_url(session_id, "pause"))
            .send()
            .await
            .map_err(|e| SubstrateError::StopFailed(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Err(SubstrateError::NotFound(session_id.to_owned()));
        }
        if !resp.status().is_success() {
            return Err(SubstrateError::NotHibernatable);
        }
        debug!(session_id, "substrate: container paused");
        Ok(())
    }

    async fn wake_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        let resp = self
            .http
            .post(self.container_url(session_id, "unpause"))
            .send()
            .await
            .map_err(|e| SubstrateError::StartFailed(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Err(SubstrateError::NotFound(session_id.to_owned()));
        }
        Ok(())
    }

    async fn resolve_vnc_port(&self, session_id: &str) -> Result<u16, SubstrateError> {
        self.vnc_ports
            .read()
            .await
            .get(session_id)
            .copied()
            .ok_or_else(|| SubstrateError::VncPortUnavailable(session_id.to_owned()))
    }

    async fn establish_port_forward(
        &self,
        session_id: &str,
        remote_port: u16,
    ) -> Result<PortForward, SubstrateError> {
        // Containers on this host are already reachable directly; "forwarding"
        // is a loopback splice onto the published port rather than a tunnel.
        let target = format!("127.0.0.1:{remote_port}");
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| SubstrateError::PortForwardFailed(e.to_string()))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| SubstrateError::PortForwardFailed(e.to_string()))?
            .port();

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut stop_rx => {}
                accepted = listener.accept() => {
                    if let Ok((mut inbound, _)) = accepted {
                        if let Ok(mut outbound) = tokio::net::TcpStream::connect(&target).await {
                            let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                        }
                    }
                }
            }
            debug!(session_id = %session_id, "substrate: loopback splice closed");
        });

        Ok(PortForward::new(local_port, stop_tx))
    }
}
