// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration.

use convoy_core::{Labels, Resources, RuntimeType, Taint};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Everything a node agent needs to attach and work.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// WebSocket endpoint of the orchestrator channel (`ws://host:port`).
    pub orchestrator_url: String,
    /// REST base of the orchestrator for credential bootstrap. `None`
    /// disables bootstrap; a pre-provisioned token must then be supplied.
    pub api_url: Option<String>,
    /// Pre-provisioned bearer token; overrides the credential store.
    pub token: Option<String>,
    /// Unique node name.
    pub name: String,
    pub runtime_type: RuntimeType,
    pub allocatable: Resources,
    pub labels: Labels,
    pub annotations: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    /// Opaque capabilities advertised at registration; `version` gates
    /// packs with a minimum runtime version.
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    /// Bounded worker slots for pack execution.
    pub worker_slots: u32,
    pub heartbeat_interval: Duration,
    pub metrics_interval: Duration,
    pub reconnect_delay: Duration,
    /// `-1` retries forever.
    pub max_reconnect_attempts: i32,
    pub token_refresh_check: Duration,
    /// Deadline for handshake round-trips (authenticate, register).
    pub rpc_timeout: Duration,
    /// Grace given to a pod's cooperative shutdown before force-abort.
    pub stop_grace: Duration,
    /// Root of the persisted node state; platform data dir when `None`.
    pub state_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn new(orchestrator_url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            orchestrator_url: orchestrator_url.into(),
            api_url: None,
            token: None,
            name: name.into(),
            runtime_type: RuntimeType::Native,
            allocatable: Resources::new(4000, 8 * 1024 * 1024 * 1024, 16, 0),
            labels: Labels::new(),
            annotations: BTreeMap::new(),
            taints: Vec::new(),
            capabilities: serde_json::Map::new(),
            worker_slots: 4,
            heartbeat_interval: Duration::from_secs(15),
            metrics_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            token_refresh_check: Duration::from_secs(60),
            rpc_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
            state_dir: None,
        }
    }

    /// Delay before reconnect attempt `attempts` (1-based): linear backoff
    /// `reconnect_delay · min(attempts, 5)`.
    pub fn reconnect_backoff(&self, attempts: u32) -> Duration {
        self.reconnect_delay * attempts.clamp(1, 5)
    }

    /// True when another reconnect attempt is allowed.
    pub fn may_retry(&self, attempts: u32) -> bool {
        self.max_reconnect_attempts < 0 || attempts < self.max_reconnect_attempts as u32
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
