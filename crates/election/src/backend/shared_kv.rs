// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared-KV leader election on top of a NATS JetStream Key-Value bucket.
//!
//! JetStream KV has no per-key TTL, so the lease is modeled explicitly: the
//! stored value carries an `expires_at` timestamp, and a holder only wins a
//! stale key by winning the revision-gated [`async_nats::jetstream::kv::Store::update`]
//! CAS against the revision it last observed — the same "compare-and-swap on
//! an expired record" shape as an etcd `Compare::version` transaction, just
//! without native server-side expiry enforcement.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_nats::jetstream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ElectionError;
use crate::LeaderElector;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    expires_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

pub struct SharedKvBackend {
    store: jetstream::kv::Store,
    key: String,
    holder_id: String,
    lease_duration: Duration,
    last_revision: Mutex<Option<u64>>,
}

impl SharedKvBackend {
    /// Connect to NATS and bind (creating if absent) the key-value bucket
    /// used to hold leader-election records.
    pub async fn connect(
        url: &str,
        token: Option<&str>,
        bucket: &str,
        key: impl Into<String>,
        holder_id: impl Into<String>,
        lease_duration: Duration,
    ) -> Result<Self, ElectionError> {
        let mut opts = async_nats::ConnectOptions::new().retry_on_initial_connect();
        if let Some(token) = token {
            opts = opts.token(token.to_owned());
        }
        let client =
            opts.connect(url).await.map_err(|e| ElectionError::Backend(e.to_string()))?;
        let js = jetstream::new(client);

        let store = match js
            .create_key_value(jetstream::kv::Config {
                bucket: bucket.to_owned(),
                history: 1,
                ..Default::default()
            })
            .await
        {
            Ok(store) => store,
            Err(_) => js
                .get_key_value(bucket)
                .await
                .map_err(|e| ElectionError::Backend(e.to_string()))?,
        };

        Ok(Self {
            store,
            key: key.into(),
            holder_id: holder_id.into(),
            lease_duration,
            last_revision: Mutex::new(None),
        })
    }

    async fn current(&self) -> Result<Option<(LeaseRecord, u64)>, ElectionError> {
        match self.store.entry(&self.key).await {
            Ok(Some(entry)) => {
                let record: LeaseRecord = serde_json::from_slice(&entry.value)
                    .map_err(|e| ElectionError::Backend(e.to_string()))?;
                Ok(Some((record, entry.revision)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(ElectionError::Backend(e.to_string())),
        }
    }
}

#[async_trait]
impl LeaderElector for SharedKvBackend {
    async fn try_acquire(&self) -> Result<bool, ElectionError> {
        let record = LeaseRecord { holder: self.holder_id.clone(), expires_at_ms: now_ms() + self.lease_duration.as_millis() as u64 };
        let bytes = serde_json::to_vec(&record).map_err(|e| ElectionError::Backend(e.to_string()))?;

        match self.current().await? {
            None => match self.store.create(&self.key, bytes.into()).await {
                Ok(revision) => {
                    *self.last_revision.lock().map_err(|_| ElectionError::Backend("poisoned".into()))? = Some(revision);
                    Ok(true)
                }
                Err(_) => Ok(false), // lost the race to another creator
            },
            Some((existing, revision)) => {
                if existing.holder == self.holder_id {
                    *self.last_revision.lock().map_err(|_| ElectionError::Backend("poisoned".into()))? = Some(revision);
                    return Ok(true);
                }
                if existing.expires_at_ms > now_ms() {
                    return Ok(false); // held by someone else, not yet expired
                }
                // Stale lease: CAS takeover gated on the revision we just read.
                match self.store.update(&self.key, bytes.into(), revision).await {
                    Ok(new_revision) => {
                        *self.last_revision.lock().map_err(|_| ElectionError::Backend("poisoned".into()))? = Some(new_revision);
                        Ok(true)
                    }
                    Err(_) => Ok(false),
                }
            }
        }
    }

    async fn renew(&self) -> Result<(), ElectionError> {
        let revision = self
            .last_revision
            .lock()
            .map_err(|_| ElectionError::Backend("poisoned".into()))?
            .ok_or(ElectionError::LostOwnership)?;

        let record = LeaseRecord { holder: self.holder_id.clone(), expires_at_ms: now_ms() + self.lease_duration.as_millis() as u64 };
        let bytes = serde_json::to_vec(&record).map_err(|e| ElectionError::Backend(e.to_string()))?;

        match self.store.update(&self.key, bytes.into(), revision).await {
            Ok(new_revision) => {
                *self.last_revision.lock().map_err(|_| ElectionError::Backend("poisoned".into()))? = Some(new_revision);
                Ok(())
            }
            Err(_) => Err(ElectionError::LostOwnership),
        }
    }

    async fn release(&self) -> Result<(), ElectionError> {
        let revision = *self.last_revision.lock().map_err(|_| ElectionError::Backend("poisoned".into()))?;
        if let Some(revision) = revision {
            // CAS-gated on the revision we last wrote, so releasing after
            // losing the lease (another holder already took it over) can
            // never clobber that holder's record.
            let tombstone = LeaseRecord { holder: String::new(), expires_at_ms: 0 };
            let bytes = serde_json::to_vec(&tombstone).map_err(|e| ElectionError::Backend(e.to_string()))?;
            let _ = self.store.update(&self.key, bytes.into(), revision).await;
        }
        *self.last_revision.lock().map_err(|_| ElectionError::Backend("poisoned".into()))? = None;
        Ok(())
    }

    async fn get_leader(&self) -> Result<Option<String>, ElectionError> {
        Ok(self.current().await?.and_then(|(record, _)| {
            if record.expires_at_ms > now_ms() {
                Some(record.holder)
            } else {
                None
            }
        }))
    }

    async fn close(&self) -> Result<(), ElectionError> {
        Ok(())
    }
}
