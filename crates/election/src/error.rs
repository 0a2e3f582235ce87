// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors surfaced by a [`crate::LeaderElector`] backend.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("leader election misconfigured: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another holder owns the lock")]
    LockHeld,

    #[error("renewal rejected: lock was taken over by another holder")]
    LostOwnership,

    #[error("backend error: {0}")]
    Backend(String),
}
