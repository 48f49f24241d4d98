// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Agent-side failures.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("registration rejected: {0}")]
    RegisterRejected(String),

    #[error("handshake timed out in phase {0}")]
    HandshakeTimeout(crate::state::AgentPhase),

    #[error("credential error: {0}")]
    Credentials(#[from] crate::credentials::CredentialError),

    #[error("api error: {0}")]
    Api(#[from] crate::api::ApiError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Agent stopped")]
    Stopped,
}
