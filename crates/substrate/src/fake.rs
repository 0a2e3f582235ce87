// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake substrate for deterministic testing: records every call and lets a
//! test script its exact session-state transitions instead of depending on
//! a real orchestrator or container daemon.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sessionhub_protocol::TemplateManifest;

use crate::{PortForward, SubstrateError, SubstratePort};

/// Recorded call to [`FakeSubstrate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstrateCall {
    Start { session_id: String },
    Stop { session_id: String },
    Hibernate { session_id: String },
    Wake { session_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Running,
    Hibernated,
}

struct FakeState {
    sessions: HashMap<String, SessionState>,
    calls: Vec<SubstrateCall>,
    vnc_port: u16,
}

#[derive(Clone)]
pub struct FakeSubstrate {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubstrate {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(FakeState { sessions: HashMap::new(), calls: Vec::new(), vnc_port: 5900 })) }
    }

    pub fn calls(&self) -> Vec<SubstrateCall> {
        self.inner.lock().expect("fake substrate lock poisoned").calls.clone()
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.inner.lock().expect("fake substrate lock poisoned").sessions.get(session_id)
            == Some(&SessionState::Running)
    }
}

#[async_trait]
impl SubstratePort for FakeSubstrate {
    async fn start_session(
        &self,
        session_id: &str,
        _manifest: &TemplateManifest,
    ) -> Result<(), SubstrateError> {
        let mut guard = self.inner.lock().expect("fake substrate lock poisoned");
        guard.sessions.insert(session_id.to_owned(), SessionState::Running);
        guard.calls.push(SubstrateCall::Start { session_id: session_id.to_owned() });
        Ok(())
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        let mut guard = self.inner.lock().expect("fake substrate lock poisoned");
        guard.sessions.remove(session_id);
        guard.calls.push(SubstrateCall::Stop { session_id: session_id.to_owned() });
        Ok(())
    }

    async fn hibernate_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        let mut guard = self.inner.lock().expect("fake substrate lock poisoned");
        match guard.sessions.get(session_id) {
            Some(SessionState::Running) => {
                guard.sessions.insert(session_id.to_owned(), SessionState::Hibernated);
                guard.calls.push(SubstrateCall::Hibernate { session_id: session_id.to_owned() });
                Ok(())
            }
            Some(SessionState::Hibernated) => Ok(()),
            None => Err(SubstrateError::NotFound(session_id.to_owned())),
        }
    }

    async fn wake_session(&self, session_id: &str) -> Result<(), SubstrateError> {
        let mut guard = self.inner.lock().expect("fake substrate lock poisoned");
        match guard.sessions.get(session_id) {
            Some(_) => {
                guard.sessions.insert(session_id.to_owned(), SessionState::Running);
                guard.calls.push(SubstrateCall::Wake { session_id: session_id.to_owned() });
                Ok(())
            }
            None => Err(SubstrateError::NotFound(session_id.to_owned())),
        }
    }

    async fn resolve_vnc_port(&self, session_id: &str) -> Result<u16, SubstrateError> {
        let guard = self.inner.lock().expect("fake substrate lock poisoned");
        if guard.sessions.contains_key(session_id) {
            Ok(guard.vnc_port)
        } else {
            Err(SubstrateError::VncPortUnavailable(session_id.to_owned()))
        }
    }

    async fn establish_port_forward(
        &self,
        _session_id: &str,
        remote_port: u16,
    ) -> Result<PortForward, SubstrateError> {
        let (tx, _rx) = tokio::sync::oneshot::channel();
        Ok(PortForward::new(remote_port, tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hibernate_requires_a_running_session() {
        let substrate = FakeSubstrate::new();
        let err = substrate.hibernate_session("missing").await.unwrap_err();
        assert!(matches!(err, SubstrateError::NotFound(_)));
    }

    #[tokio::test]
    async fn start_then_hibernate_then_wake_round_trips_running_state() {
        let substrate = FakeSubstrate::new();
        substrate.start_session("s1", &serde_json::json!({})).await.expect("start");
        assert!(substrate.is_running("s1"));

        substrate.hibernate_session("s1").await.expect("hibernate");
        assert!(!substrate.is_running("s1"));

        substrate.wake_session("s1").await.expect("wake");
        assert!(substrate.is_running("s1"));

        assert_eq!(
            substrate.calls(),
            vec![
                SubstrateCall::Start { session_id: "s1".into() },
                SubstrateCall::Hibernate { session_id: "s1".into() },
                SubstrateCall::Wake { session_id: "s1".into() },
            ]
        );
    }
}
