// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A registry of per-client bounded channels, each tagged with the tenant
//! (`org_id`) it subscribed as, used to fan values out to every client in a
//! tenant without leaking them across tenants. One upstream value can still
//! reach many downstream clients — the same bridge shape a single agent
//! connection uses to serve many browser tabs — except here the filter key is
//! `org_id` instead of a subscription-flags bitmask, and a client that can't
//! keep up is dropped rather than allowed to stall the others.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

struct ClientSlot<T> {
    org_id: String,
    tx: mpsc::Sender<T>,
}

pub struct ClientRegistry<T> {
    clients: RwLock<HashMap<Uuid, ClientSlot<T>>>,
}

impl<T: Clone + Send + 'static> ClientRegistry<T> {
    pub fn new() -> Self {
        Self { clients: RwLock::new(HashMap::new()) }
    }

    /// Register a new client scoped to `org_id`, returning the ID to
    /// unregister with and the receiver to drain.
    pub async fn register(&self, org_id: String) -> (Uuid, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(256);
        let id = Uuid::new_v4();
        self.clients.write().await.insert(id, ClientSlot { org_id, tx });
        (id, rx)
    }

    pub async fn unregister(&self, id: Uuid) {
        self.clients.write().await.remove(&id);
    }

    /// Deliver `value` to every registered client whose `org_id` matches.
    /// A client whose channel is full or closed is evicted rather than
    /// allowed to back up the others.
    pub async fn fan_out_scoped(&self, org_id: &str, value: T) {
        let mut dead = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, slot) in clients.iter() {
                if slot.org_id != org_id {
                    continue;
                }
                if slot.tx.try_send(value.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut clients = self.clients.write().await;
            for id in dead {
                clients.remove(&id);
            }
        }
    }

    /// Distinct `org_id`s with at least one registered client.
    pub async fn active_orgs(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut orgs: Vec<String> = clients.values().map(|s| s.org_id.clone()).collect();
        orgs.sort();
        orgs.dedup();
        orgs
    }
}

impl<T: Clone + Send + 'static> Default for ClientRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_only_reaches_clients_in_the_same_org() {
        let registry: ClientRegistry<u32> = ClientRegistry::new();
        let (_id_a, mut rx_a) = registry.register("org-a".into()).await;
        let (_id_b, mut rx_b) = registry.register("org-b".into()).await;

        registry.fan_out_scoped("org-a", 42).await;

        assert_eq!(rx_a.try_recv(), Ok(42));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistering_a_client_stops_further_delivery() {
        let registry: ClientRegistry<u32> = ClientRegistry::new();
        let (id, mut rx) = registry.register("org-a".into()).await;
        registry.unregister(id).await;

        registry.fan_out_scoped("org-a", 1).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_the_receiver_evicts_the_client_on_next_fan_out() {
        let registry: ClientRegistry<u32> = ClientRegistry::new();
        let (_id, rx) = registry.register("org-a".into()).await;
        drop(rx);

        registry.fan_out_scoped("org-a", 1).await;
        assert!(registry.active_orgs().await.is_empty());
    }
}
