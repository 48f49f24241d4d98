// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted node identity and credentials, keyed by orchestrator URL.
//!
//! Zero-config agents keep one JSON state file per orchestrator in the
//! platform data dir. On startup the stored credential is tried first
//! (with refresh-token rotation); only when the orchestrator permits
//! public sign-up and nothing usable is stored does the agent register a
//! fresh machine user.

use convoy_core::NodeId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Credential material issued by the orchestrator's auth boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry instant, epoch milliseconds.
    pub expires_at: u64,
    pub user_id: String,
    pub email: String,
}

impl Credentials {
    /// True when the token should be rotated before use.
    pub fn expires_within(&self, now_ms: u64, margin_ms: u64) -> bool {
        self.expires_at <= now_ms.saturating_add(margin_ms)
    }
}

/// Everything the agent remembers about one orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNodeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub name: String,
    pub orchestrator_url: String,
    pub registered_at: u64,
    pub last_started: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Failures reading or writing the state file.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no data directory available for credential storage")]
    NoDataDir,

    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// File-backed store of [`PersistedNodeState`], one file per orchestrator.
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Store under an explicit root (tests, containerized agents).
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store under the platform data dir (`…/convoy/nodes`).
    pub fn open_default() -> Result<Self, CredentialError> {
        let root = dirs::data_dir()
            .ok_or(CredentialError::NoDataDir)?
            .join("convoy")
            .join("nodes");
        Ok(Self { root })
    }

    fn path_for(&self, orchestrator_url: &str) -> PathBuf {
        self.root.join(format!("{}.json", url_key(orchestrator_url)))
    }

    /// Load the state for an orchestrator, `None` when never registered.
    pub fn load(
        &self,
        orchestrator_url: &str,
    ) -> Result<Option<PersistedNodeState>, CredentialError> {
        let path = self.path_for(orchestrator_url);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CredentialError::Read { path, source }),
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|source| CredentialError::Corrupt { path, source })?;
        debug!(url = orchestrator_url, "loaded persisted node state");
        Ok(Some(state))
    }

    pub fn save(&self, state: &PersistedNodeState) -> Result<(), CredentialError> {
        let path = self.path_for(&state.orchestrator_url);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| CredentialError::Write { path: path.clone(), source })?;
        }
        let bytes = serde_json::to_vec_pretty(state).map_err(|source| {
            CredentialError::Corrupt { path: path.clone(), source }
        })?;
        std::fs::write(&path, bytes)
            .map_err(|source| CredentialError::Write { path, source })?;
        info!(url = %state.orchestrator_url, node = ?state.node_id, "persisted node state");
        Ok(())
    }

    /// Drop stored credentials after a hard auth failure, keeping the node
    /// identity so a re-registered user can resume it.
    pub fn clear_credentials(&self, orchestrator_url: &str) -> Result<(), CredentialError> {
        if let Some(mut state) = self.load(orchestrator_url)? {
            state.credentials = None;
            self.save(&state)?;
        }
        Ok(())
    }
}

/// Filesystem-safe key for an orchestrator URL.
fn url_key(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
