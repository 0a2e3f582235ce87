// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes-backed substrate: each session is a single `Pod`, created by
//! applying the caller-supplied template manifest verbatim and torn down by
//! deleting it. Hibernation has no native Kubernetes analogue, so it is
//! modeled as delete-and-remember: the manifest used to start the session is
//! cached so `wake_session` can recreate the pod unchanged.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use sessionhub_protocol::TemplateManifest;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};

use crate::{PortForward, SubstrateError, SubstratePort};

/// Name of the container port a session's template manifest is expected to
/// expose for VNC. Resolved by name rather than a fixed number since
/// template manifests are opaque and may vary their container layout.
const VNC_PORT_NAME: &str = "vnc";

pub struct OrchestratorSubstrate {
    api: Api<Pod>,
    namespace: String,
    hibernated_manifests: RwLock<HashMap<String, TemplateManifest>>,
}

impl OrchestratorSubstrate {
    pub async fn new(namespace: impl Into<String>) -> Result<Self, SubstrateError> {
        let namespace = namespace.into();
        let client =
            Client::try_default().await.map_err(|e| SubstrateError::Backend(e.to_string()))?;
        let api = Api::namespaced(client, &namespace);
        Ok(Self { api, namespace, hibernated_manifests: RwLock::new(HashMap::new()) })
    }

    async fn apply_pod(&self, session_id: &str, manifest: &TemplateManifest) -> Result<(), SubstrateError> {
        let mut body = manifest.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.entry("apiVersion").or_insert_with(|| "v1".into());
            obj.entry("kind").or_insert_with(|| "Pod".into());
            let metadata = obj.entry("metadata").or_insert_with(|| serde_json::json!({}));
            if let Some(meta_obj) = metadata.as_object_mut() {
                meta_obj.insert("name".to_owned(), session_id.into());
                meta_obj.insert("namespace".to_owned(), self.namespace.clone().into());
            }
        }

        match self.api.get_opt(session_id).await.map_err(|e| SubstrateError::Backend(e.to_string()))? {
            Some(_) => Ok(()), // already running; redelivered start_session is a no-op
            None => {
                self.api
                    .create(&PostParams::default(), &serde_json::from_value(body).map_err(|e| {
                        SubstrateError::StartFailed(format!("invalid pod manifest: {e}"))
                    })?)
                    .await
                    .map_err(|e| SubstrateError::StartFailed(e.to_string()))?;
                info!(session_id, "substrate: pod created");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SubstratePort for OrchestratorSubstrate {
    async fn start_session(
        &self,
        session_id: &str,
        manifest: &TemplateManifest,
    ) -> Result<(), SubstrateError> {
        self.hibernated_manifests.write().await.insert(session_id.to_owned(), manifest.clone());
        self.apply_pod(session_id, manifest).await
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        self.hibernated_manifests.write().await.remove(session_id);
        match self.api.delete(session_id, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(SubstrateError::StopFailed(e.to_string())),
        }
    }

    async fn hibernate_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        if !self.hibernated_manifests.read().await.contains_key(session_id) {
            return Err(SubstrateError::NotHibernatable);
        }
        match self.api.delete(session_id, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(session_id, "substrate: pod hibernated (deleted, manifest retained)");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(SubstrateError::StopFailed(e.to_string())),
        }
    }

    async fn wake_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        let manifest = self
            .hibernated_manifests
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SubstrateError::NotFound(session_id.to_owned()))?;
        self.apply_pod(session_id, &manifest).await
    }

    async fn resolve_vnc_port(&self, session_id: &str) -> Result<u16, SubstrateError> {
        let pod = self
            .api
            .get(session_id)
            .await
            .map_err(|_| SubstrateError::NotFound(session_id.to_owned()))?;
        pod.spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .and_then(|c| c.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.name.as_deref() == Some(VNC_PORT_NAME)))
            .map(|p| p.container_port as u16)
            .ok_or_else(|| SubstrateError::VncPortUnavailable(session_id.to_owned()))
    }

    async fn establish_port_forward(
        &self,
        session_id: &str,
        remote_port: u16,
    ) -> Result<PortForward, SubstrateError> {
        let mut pf = self
            .api
            .portforward(session_id, &[remote_port])
            .await
            .map_err(|e| SubstrateError::PortForwardFailed(e.to_string()))?;
        let mut stream = pf
            .take_stream(remote_port)
            .ok_or_else(|| SubstrateError::PortForwardFailed("no stream for port".into()))?;

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
                    if let Ok((mut socket, _)) = accepted {
                        let _ = tokio::io::copy_bidirectional(&mut socket, &mut stream).await;
                    }
                }
            }
            debug!(session_id = %session_id, "substrate: port-forward tunnel closed");
        });

        Ok(PortForward::new(local_port, stop_tx))
    }
}
