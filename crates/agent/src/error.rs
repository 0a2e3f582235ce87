// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Internal error types for the agent runtime's own modules. The outermost
//! `run()`/`main()` boundary still collapses everything into `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported action: {0:?}")]
    Unsupported(sessionhub_protocol::CommandAction),
    #[error("substrate error: {0}")]
    Substrate(#[from] sessionhub_substrate::SubstrateError),
    #[error("malformed command payload: {0}")]
    MalformedPayload(String),
}
