// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication boundary.
//!
//! Token verification is external; the control plane consumes it through
//! [`AuthProvider`]. [`StaticAuthProvider`] covers tests and single-node
//! deployments with a fixed token table.

use async_trait::async_trait;
use convoy_core::UserId;
use std::collections::HashMap;
use thiserror::Error;

/// Role required to register nodes.
pub const ROLE_NODES_WRITE: &str = "nodes:write";
/// Role that implies every permission.
pub const ROLE_ADMIN: &str = "admin";

/// Authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, roles: Vec<String>) -> Self {
        Self { user_id: user_id.into(), roles }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role || r == ROLE_ADMIN)
    }

    pub fn may_register_nodes(&self) -> bool {
        self.has_role(ROLE_NODES_WRITE)
    }
}

/// Token verification failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("auth provider unavailable: {0}")]
    Unavailable(String),
}

/// External authentication provider.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// Validate a bearer token, returning the principal it belongs to.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Fixed token → identity table.
#[derive(Default)]
pub struct StaticAuthProvider {
    tokens: HashMap<String, Identity>,
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-token provider granting node registration rights, for the
    /// standalone daemon.
    pub fn single(token: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        let mut provider = Self::new();
        provider.add_token(
            token,
            Identity::new(user_id, vec![ROLE_NODES_WRITE.to_string()]),
        );
        provider
    }

    pub fn add_token(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
