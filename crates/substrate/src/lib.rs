// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The substrate port: the seam between the agent runtime's command handling
//! and whatever actually runs a sandboxed session — a Kubernetes pod, a
//! container on a local daemon, or (in tests) nothing at all.

pub mod container_daemon;
pub mod orchestrator;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use sessionhub_protocol::TemplateManifest;
use thiserror::Error;

/// Errors from substrate operations.
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session start failed: {0}")]
    StartFailed(String),
    #[error("session stop failed: {0}")]
    StopFailed(String),
    #[error("session is not hibernatable in its current state")]
    NotHibernatable,
    #[error("vnc port not yet available for session {0}")]
    VncPortUnavailable(String),
    #[error("port-forward failed: {0}")]
    PortForwardFailed(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A live port-forward from the agent host to a session's VNC listener.
pub struct PortForward {
    pub local_port: u16,
    stop: Option<tokio::sync::oneshot::Sender<()>>,
}

impl PortForward {
    pub fn new(local_port: u16, stop: tokio::sync::oneshot::Sender<()>) -> Self {
        Self { local_port, stop: Some(stop) }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Operations the agent runtime needs from whatever hosts sandboxed sessions.
///
/// Implementations must make every method safe to call even when the
/// session is already in the target state (e.g. `start_session` on an
/// already-running session is a no-op success, not an error) since the
/// command dispatcher may redeliver a command after a reconnect.
#[async_trait]
pub trait SubstratePort: Send + Sync {
    /// Start a sandboxed session from an opaque template manifest.
    async fn start_session(
        &self,
        session_id: &str,
        manifest: &TemplateManifest,
    ) -> Result<(), SubstrateError>;

    /// Stop a session, releasing its substrate resources.
    async fn stop_session(&self, session_id: &str) -> Result<(), SubstrateError>;

    /// Suspend a session without releasing its storage.
    async fn hibernate_session(&self, session_id: &str) -> Result<(), SubstrateError>;

    /// Resume a previously hibernated session.
    async fn wake_session(&self, session_id: &str) -> Result<(), SubstrateError>;

    /// Resolve the in-session TCP port a VNC server is listening on.
    async fn resolve_vnc_port(&self, session_id: &str) -> Result<u16, SubstrateError>;

    /// Establish a local port-forward to the session's VNC port.
    async fn establish_port_forward(
        &self,
        session_id: &str,
        remote_port: u16,
    ) -> Result<PortForward, SubstrateError>;
}
