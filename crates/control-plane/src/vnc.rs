// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VNC Proxy: issues short-lived signed tokens for display access and tracks
//! the tunnel records that splice a browser WebSocket onto an agent-side VNC
//! relay keyed by tunnel ID.

use std::sync::Arc;

use base64::Engine;
use ring::hmac;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::SessionHubError;
use crate::state::{ControlPlaneState, TunnelRecord};

/// A verified VNC token's claims: which session it authorizes and which user
/// it was issued to.
#[derive(Debug, PartialEq, Eq)]
pub struct VncClaims {
    pub session_id: String,
    pub user_id: String,
}

/// Issue a signed VNC access token for a session and user, scoped to
/// [`sessionhub_protocol::constants::VNC_TOKEN_TTL`].
///
/// Format: `{session_id}.{user_id}.{expiry_epoch_secs}.{base64url(hmac)}`.
pub fn issue_token(signing_key: &[u8], session_id: &str, user_id: &str) -> String {
    let expiry = now_epoch_secs() + sessionhub_protocol::constants::VNC_TOKEN_TTL.as_secs();
    let message = format!("{session_id}.{user_id}.{expiry}");
    let tag = sign(signing_key, message.as_bytes());
    format!("{message}.{tag}")
}

/// Verify a VNC access token, returning the session and user it authorizes.
pub fn verify_token(signing_key: &[u8], token: &str) -> Result<VncClaims, SessionHubError> {
    let mut parts = token.rsplitn(2, '.');
    let tag = parts.next().ok_or(SessionHubError::Unauthorized)?;
    let message = parts.next().ok_or(SessionHubError::Unauthorized)?;

    let expected = sign(signing_key, message.as_bytes());
    if !constant_time_eq(tag, &expected) {
        return Err(SessionHubError::Unauthorized);
    }

    let mut msg_parts = message.splitn(3, '.');
    let session_id = msg_parts.next().ok_or(SessionHubError::Unauthorized)?;
    let user_id = msg_parts.next().ok_or(SessionHubError::Unauthorized)?;
    let expiry: u64 =
        msg_parts.next().and_then(|s| s.parse().ok()).ok_or(SessionHubError::Unauthorized)?;
    if now_epoch_secs() > expiry {
        return Err(SessionHubError::Unauthorized);
    }

    Ok(VncClaims { session_id: session_id.to_owned(), user_id: user_id.to_owned() })
}

fn sign(key: &[u8], message: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, message);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Open a new tunnel record for a verified session, returning the tunnel ID
/// both sides use to tag `vnc_data` frames and a receiver the caller's
/// browser-socket task should drain to forward chunks downstream.
pub async fn open_tunnel(
    state: &ControlPlaneState,
    session_id: &str,
    agent_id: &str,
) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let tunnel_id = Uuid::new_v4().to_string();
    let cancel = state.shutdown.child_token();
    let (to_browser, from_agent) = tokio::sync::mpsc::unbounded_channel();
    let record = Arc::new(TunnelRecord::new(
        tunnel_id.clone(),
        session_id.to_owned(),
        agent_id.to_owned(),
        cancel,
        to_browser,
    ));
    state.tunnels.write().await.insert(tunnel_id.clone(), record);
    info!(tunnel_id = %tunnel_id, session_id, agent_id, "vnc tunnel opened");
    (tunnel_id, from_agent)
}

/// Close and forget a tunnel, cancelling its splice task.
pub async fn close_tunnel(state: &ControlPlaneState, tunnel_id: &str) {
    if let Some(record) = state.tunnels.write().await.remove(tunnel_id) {
        record.cancel.cancel();
    }
}

/// Mark a tunnel as having just carried traffic, resetting its idle clock.
pub async fn touch_tunnel(state: &ControlPlaneState, tunnel_id: &str) {
    if let Some(record) = state.tunnels.read().await.get(tunnel_id) {
        record.touch();
    }
}

/// Spawn the background sweep that tears down tunnels idle past the
/// configured timeout.
pub fn spawn_idle_sweep(state: Arc<ControlPlaneState>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(30));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let idle_timeout = state.config.vnc_idle_timeout();
            let expired: Vec<String> = {
                let tunnels = state.tunnels.read().await;
                tunnels
                    .values()
                    .filter(|t| t.idle_for() > idle_timeout)
                    .map(|t| t.token.clone())
                    .collect()
            };
            for tunnel_id in expired {
                info!(tunnel_id = %tunnel_id, "closing idle vnc tunnel");
                close_tunnel(&state, &tunnel_id).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_with_same_key() {
        let key = b"test-signing-key";
        let token = issue_token(key, "session-1", "user-1");
        let claims = verify_token(key, &token).expect("verify");
        assert_eq!(claims.session_id, "session-1");
        assert_eq!(claims.user_id, "user-1");
    }

    #[test]
    fn token_signed_with_different_key_fails() {
        let token = issue_token(b"key-a", "session-1", "user-1");
        let err = verify_token(b"key-b", &token).unwrap_err();
        assert!(matches!(err, SessionHubError::Unauthorized));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let err = verify_token(b"key", "not-a-token").unwrap_err();
        assert!(matches!(err, SessionHubError::Unauthorized));
    }
}
