// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timing and sizing constants shared by the control plane and the agent.

use std::time::Duration;

/// Interval at which a connected agent sends a `heartbeat` frame.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// An agent with no heartbeat for this long is considered stale and is
/// deregistered by the Agent Hub's sweep.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(45);

/// WebSocket pong-wait deadline; the read side resets this on every pong.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period, derived the same way as `(pong_wait * 9) / 10`.
pub fn ping_period() -> Duration {
    PONG_WAIT * 9 / 10
}

/// Time-to-live for a signed VNC session token.
pub const VNC_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Maximum WebSocket frame size accepted on any endpoint in this system.
pub const MAX_FRAME_BYTES: usize = 512 * 1024;

/// Maximum size of a single base64-encoded VNC data chunk before encoding.
pub const VNC_MAX_CHUNK_BYTES: usize = 32 * 1024;

/// Default leader-election retry period (Backend B/C poll interval).
pub const ELECTION_RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Default leader-election renew deadline (must exceed the retry period).
pub const ELECTION_RENEW_DEADLINE: Duration = Duration::from_secs(10);

/// Default leader-election lease duration (must exceed the renew deadline).
pub const ELECTION_LEASE_DURATION: Duration = Duration::from_secs(15);

/// Shared-state advisory key TTL (`agent:{id}:instance` / `agent:{id}:connected`).
pub const SHARED_STATE_KEY_TTL: Duration = Duration::from_secs(300);

/// Default VNC tunnel inactivity teardown window.
pub const VNC_TUNNEL_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default command-record retention window before garbage collection.
pub const COMMAND_RETENTION: Duration = Duration::from_secs(24 * 3600);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_timings_are_strictly_ordered() {
        assert!(ELECTION_RETRY_PERIOD < ELECTION_RENEW_DEADLINE);
        assert!(ELECTION_RENEW_DEADLINE < ELECTION_LEASE_DURATION);
    }

    #[test]
    fn ping_period_is_nine_tenths_of_pong_wait() {
        assert_eq!(ping_period(), Duration::from_secs(54));
    }
}
