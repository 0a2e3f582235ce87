// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end smoke tests.
//!
//! Spawns the real `sessionhub-control-plane` and `sessionhub-agent` binaries
//! as subprocesses and exercises them over HTTP and WebSocket, backed by a
//! fake container daemon so no real container runtime is required.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

use axum::routing::{delete, post};
use axum::Router;
use tokio::net::TcpListener;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls. Safe to call
/// multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn workspace_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest).to_path_buf()
}

fn binary_path(name: &str) -> PathBuf {
    workspace_root().join("target").join("debug").join(name)
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A minimal stand-in for a container daemon's HTTP API, implementing just
/// enough of `ContainerDaemonSubstrate`'s contract (create/start/stop/pause/
/// unpause/delete, all unconditionally successful) to let a real agent
/// process run session lifecycle commands against it in tests.
pub struct FakeDaemon {
    addr: std::net::SocketAddr,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl FakeDaemon {
    pub async fn spawn() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let router = Router::new()
            .route("/containers/create", post(|| async { axum::http::StatusCode::CREATED }))
            .route(
                "/containers/{id}/start",
                post(|| async { axum::http::StatusCode::OK }),
            )
            .route("/containers/{id}/stop", post(|| async { axum::http::StatusCode::OK }))
            .route("/containers/{id}/pause", post(|| async { axum::http::StatusCode::OK }))
            .route("/containers/{id}/unpause", post(|| async { axum::http::StatusCode::OK }))
            .route("/containers/{id}", delete(|| async { axum::http::StatusCode::OK }));

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });

        Ok(Self { addr, _shutdown: tx })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// A running `sessionhub-control-plane` process, killed on drop.
pub struct ControlPlaneProcess {
    child: Child,
    port: u16,
    _lock_dir: tempfile::TempDir,
}

impl ControlPlaneProcess {
    /// Spawn the control plane bound to a free loopback port, using a
    /// tempdir-backed file-lock election backend so no NATS server is
    /// required for the process to come up.
    pub fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = binary_path("sessionhub-control-plane");
        anyhow::ensure!(binary.exists(), "control-plane binary not found at {}", binary.display());

        let port = free_port()?;
        let lock_dir = tempfile::tempdir()?;
        let lock_path = lock_dir.path().join("control-plane.lock");

        let child = Command::new(&binary)
            .args([
                "--host",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "--election-backend",
                "file-lock",
                "--election-lock-path",
            ])
            .arg(&lock_path)
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, _lock_dir: lock_dir })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_connect_url(&self, agent_id: &str, capacity: u32) -> String {
        format!(
            "ws://127.0.0.1:{}/api/v1/agents/connect?agent_id={agent_id}&org_id=org-1&capacity={capacity}",
            self.port
        )
    }

    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("control plane did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ControlPlaneProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A running `sessionhub-agent` process, killed on drop.
pub struct AgentProcess {
    child: Child,
    _lock_dir: tempfile::TempDir,
}

impl AgentProcess {
    pub fn start(agent_id: &str, control_plane: &ControlPlaneProcess, daemon: &FakeDaemon) -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = binary_path("sessionhub-agent");
        anyhow::ensure!(binary.exists(), "agent binary not found at {}", binary.display());

        let lock_dir = tempfile::tempdir()?;
        let lock_path = lock_dir.path().join("agent.lock");

        let child = Command::new(&binary)
            .args([
                "--agent-id",
                agent_id,
                "--org-id",
                "org-1",
                "--host",
                "test-host",
                "--control-plane-url",
                &control_plane.base_url(),
                "--daemon-url",
                &daemon.base_url(),
                "--election-lock-path",
            ])
            .arg(&lock_path)
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, _lock_dir: lock_dir })
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Poll `GET /health` on a control plane until `connected_agents` reaches
/// `want`, or time out.
pub async fn wait_for_connected_agents(
    control_plane: &ControlPlaneProcess,
    want: usize,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let client = reqwest::Client::new();
    let url = format!("{}/health", control_plane.base_url());
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("connected_agents never reached {want} within {timeout:?}");
        }
        if let Ok(resp) = client.get(&url).send().await {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if body["connected_agents"].as_u64() == Some(want as u64) {
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
