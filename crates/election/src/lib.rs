// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader election: exactly one process per logical `agent_id` acts as the
//! writer at a time, regardless of which backend (file lock, shared KV, or
//! orchestrator labels) is in play.

pub mod backend;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::ElectionError;

/// Backend-agnostic leadership operations. Implementations must make
/// `try_acquire`/`renew`/`release` safe to call repeatedly and must never
/// grant leadership to two holders for the same key at once.
#[async_trait]
pub trait LeaderElector: Send + Sync {
    /// Attempt to become leader. Returns `Ok(true)` if this call won
    /// leadership, `Ok(false)` if another holder currently owns it.
    async fn try_acquire(&self) -> Result<bool, ElectionError>;

    /// Extend this holder's lease. Fails with
    /// [`ElectionError::LostOwnership`] if the lock was taken over by
    /// another holder since the last successful acquire/renew.
    async fn renew(&self) -> Result<(), ElectionError>;

    /// Voluntarily give up leadership. Safe to call when not leader.
    async fn release(&self) -> Result<(), ElectionError>;

    /// Best-effort read of the current holder's identity, if known.
    async fn get_leader(&self) -> Result<Option<String>, ElectionError>;

    /// Release any held resources (connections, file handles). Called once
    /// on shutdown; implementations should make this idempotent.
    async fn close(&self) -> Result<(), ElectionError>;
}

/// Observable leadership state of a running [`Elector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectorState {
    Standby,
    Leader,
    Stopped,
}

/// Timing configuration for a leader-election loop.
///
/// Must satisfy `retry_period < renew_deadline < lease_duration`; use
/// [`ElectorConfig::validate`] before constructing an [`Elector`].
#[derive(Debug, Clone, Copy)]
pub struct ElectorConfig {
    pub retry_period: Duration,
    pub renew_deadline: Duration,
    pub lease_duration: Duration,
}

impl ElectorConfig {
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.retry_period >= self.renew_deadline {
            return Err(ElectionError::Config(format!(
                "retry_period ({:?}) must be less than renew_deadline ({:?})",
                self.retry_period, self.renew_deadline
            )));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(ElectionError::Config(format!(
                "renew_deadline ({:?}) must be less than lease_duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }
        Ok(())
    }
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            retry_period: sessionhub_protocol::constants::ELECTION_RETRY_PERIOD,
            renew_deadline: sessionhub_protocol::constants::ELECTION_RENEW_DEADLINE,
            lease_duration: sessionhub_protocol::constants::ELECTION_LEASE_DURATION,
        }
    }
}

/// Drives a [`LeaderElector`] backend through the standby/leader state
/// machine until cancelled.
pub struct Elector {
    backend: Arc<dyn LeaderElector>,
    config: ElectorConfig,
    state_tx: watch::Sender<ElectorState>,
}

impl Elector {
    pub fn new(backend: Arc<dyn LeaderElector>, config: ElectorConfig) -> Result<Self, ElectionError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ElectorState::Standby);
        Ok(Self { backend, config, state_tx })
    }

    /// Subscribe to leadership-state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ElectorState> {
        self.state_tx.subscribe()
    }

    /// Current leadership state.
    pub fn state(&self) -> ElectorState {
        *self.state_tx.borrow()
    }

    /// Run the election loop until `cancel` fires. While leader, renews on
    /// `retry_period`; a renew failure (lost ownership) or a renew that
    /// doesn't complete within `renew_deadline` demotes back to standby.
    /// While standby, attempts acquisition every `retry_period`.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.state() {
                ElectorState::Leader => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_period) => {
                            self.renew_or_demote().await;
                        }
                    }
                }
                ElectorState::Standby => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_period) => {
                            self.try_promote().await;
                        }
                    }
                }
                ElectorState::Stopped => break,
            }
        }

        let _ = self.backend.release().await;
        let _ = self.backend.close().await;
        self.set_state(ElectorState::Stopped);
        info!("leader election loop stopped");
    }

    async fn try_promote(&self) {
        match tokio::time::timeout(self.config.renew_deadline, self.backend.try_acquire()).await {
            Ok(Ok(true)) => {
                info!("acquired leadership");
                self.set_state(ElectorState::Leader);
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => debug!(error = %e, "leadership acquisition attempt failed"),
            Err(_) => warn!("leadership acquisition attempt timed out"),
        }
    }

    async fn renew_or_demote(&self) {
        match tokio::time::timeout(self.config.renew_deadline, self.backend.renew()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "lease renewal failed, stepping down");
                self.set_state(ElectorState::Standby);
            }
            Err(_) => {
                warn!("lease renewal timed out, stepping down");
                self.set_state(ElectorState::Standby);
            }
        }
    }

    fn set_state(&self, state: ElectorState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
