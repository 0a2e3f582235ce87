// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator-label leader election: the holder identity is recorded as a
//! label on an existing orchestrator object (a Kubernetes `Service`, chosen
//! over a native `Lease` so deployments that already expose one Service per
//! agent need no extra CRD) and optimistic concurrency on the object's
//! `resourceVersion` plays the role of a CAS.
//!
//! A second label carries the holder's last renewal time so a replica that
//! died without releasing the lease doesn't lock it out forever: any
//! candidate may take over a label whose renewal timestamp is older than
//! `lease_duration`, the same staleness rule the other two backends apply to
//! their own lease records.
//!
//! This backend never guesses the holder's own identity from the hostname:
//! it reads it from the container's own orchestrator-assigned task label
//! and fails closed with [`ElectionError::Config`] if that label is absent,
//! since a guessed identity could silently double up with another replica.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use sessionhub_protocol::{iso8601_now, iso8601_to_epoch_secs};

use crate::error::ElectionError;
use crate::LeaderElector;

/// Environment variable an orchestrator is expected to inject with this
/// container's own task identity (e.g. templated from `{{.Task.ID}}`).
pub const TASK_IDENTITY_ENV_VAR: &str = "SESSIONHUB_TASK_ID";

/// Label key carrying the current holder's task identity.
const LEADER_LABEL: &str = "sessionhub.io/leader";

/// Label key carrying the holder's last renewal timestamp (ISO 8601, `-`/`:`
/// are not valid label-value characters so they are replaced with `_`/`.`).
const RENEWED_AT_LABEL: &str = "sessionhub.io/leader-renewed-at";

fn now_epoch_secs() -> u64 {
    iso8601_to_epoch_secs(&iso8601_now()).unwrap_or(0)
}

fn encode_label_timestamp(ts: &str) -> String {
    ts.replace(':', ".").replace('-', "_")
}

fn decode_label_timestamp(label: &str) -> String {
    // Inverse of `encode_label_timestamp`: `-` only ever appears in the date
    // portion, `:` only in the time portion, so a blind replace round-trips.
    label.replacen('_', "-", 2).replace('.', ":")
}

pub struct OrchestratorLabelBackend {
    api: Api<Service>,
    service_name: String,
    holder_id: String,
    lease_duration: Duration,
}

struct CurrentLease {
    holder: Option<String>,
    renewed_at_secs: Option<u64>,
    resource_version: Option<String>,
}

impl CurrentLease {
    fn is_stale(&self, lease_duration: Duration) -> bool {
        match self.renewed_at_secs {
            Some(renewed_at) => now_epoch_secs().saturating_sub(renewed_at) > lease_duration.as_secs(),
            None => true,
        }
    }
}

impl OrchestratorLabelBackend {
    /// Resolve the holder identity from [`TASK_IDENTITY_ENV_VAR`] and bind to
    /// a `Service` object's labels within `namespace`.
    pub async fn new(
        namespace: &str,
        service_name: impl Into<String>,
        lease_duration: Duration,
    ) -> Result<Self, ElectionError> {
        let holder_id = std::env::var(TASK_IDENTITY_ENV_VAR).map_err(|_| {
            ElectionError::Config(format!(
                "{TASK_IDENTITY_ENV_VAR} is not set; refusing to infer identity from hostname"
            ))
        })?;
        let client =
            Client::try_default().await.map_err(|e| ElectionError::Backend(e.to_string()))?;
        let api = Api::namespaced(client, namespace);
        Ok(Self { api, service_name: service_name.into(), holder_id, lease_duration })
    }

    async fn current(&self) -> Result<CurrentLease, ElectionError> {
        let svc = self
            .api
            .get(&self.service_name)
            .await
            .map_err(|e| ElectionError::Backend(e.to_string()))?;
        let resource_version = svc.metadata.resource_version.clone();
        let labels = svc.metadata.labels.as_ref();
        let holder = labels.and_then(|l| l.get(LEADER_LABEL)).cloned();
        let renewed_at_secs = labels
            .and_then(|l| l.get(RENEWED_AT_LABEL))
            .map(|v| decode_label_timestamp(v))
            .and_then(|ts| iso8601_to_epoch_secs(&ts));
        Ok(CurrentLease { holder, renewed_at_secs, resource_version })
    }

    async fn patch_label(&self, resource_version: Option<String>) -> Result<(), ElectionError> {
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": self.service_name,
                "resourceVersion": resource_version,
                "labels": {
                    LEADER_LABEL: self.holder_id,
                    RENEWED_AT_LABEL: encode_label_timestamp(&iso8601_now()),
                },
            }
        });
        self.api
            .patch(
                &self.service_name,
                &PatchParams::apply("sessionhub-election"),
                &Patch::Apply(&patch),
            )
            .await
            .map_err(|e| ElectionError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl LeaderElector for OrchestratorLabelBackend {
    async fn try_acquire(&self) -> Result<bool, ElectionError> {
        let lease = self.current().await?;
        match lease.holder {
            Some(ref h) if h == &self.holder_id => Ok(true),
            Some(_) if !lease.is_stale(self.lease_duration) => Ok(false),
            // Absent, or held by someone else but stale: anyone may take it.
            _ => match self.patch_label(lease.resource_version).await {
                Ok(()) => Ok(true),
                Err(_) => Ok(false), // another candidate won the race
            },
        }
    }

    async fn renew(&self) -> Result<(), ElectionError> {
        let lease = self.current().await?;
        if lease.holder.as_deref() != Some(self.holder_id.as_str()) {
            return Err(ElectionError::LostOwnership);
        }
        self.patch_label(lease.resource_version).await
    }

    async fn release(&self) -> Result<(), ElectionError> {
        let lease = self.current().await?;
        if lease.holder.as_deref() != Some(self.holder_id.as_str()) {
            return Ok(());
        }
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": self.service_name,
                "resourceVersion": lease.resource_version,
                "labels": {
                    LEADER_LABEL: serde_json::Value::Null,
                    RENEWED_AT_LABEL: serde_json::Value::Null,
                },
            }
        });
        self.api
            .patch(
                &self.service_name,
                &PatchParams::apply("sessionhub-election"),
                &Patch::Apply(&patch),
            )
            .await
            .map_err(|e| ElectionError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_leader(&self) -> Result<Option<String>, ElectionError> {
        let lease = self.current().await?;
        if lease.is_stale(self.lease_duration) {
            Ok(None)
        } else {
            Ok(lease.holder)
        }
    }

    async fn close(&self) -> Result<(), ElectionError> {
        Ok(())
    }
}
