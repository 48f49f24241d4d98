// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment: declarative desired state producing pods.
//!
//! `replicas = 0` selects daemonset mode (one pod per eligible node).
//! Failure bookkeeping (`consecutive_failures`, `failed_version`,
//! `failure_backoff_until_ms`, `last_successful_version`) drives crash-loop
//! detection and automatic rollback in the reconciler.

use crate::labels::Labels;
use crate::pack::PackId;
use crate::pod::PodScheduling;
use crate::resources::Resources;
use crate::taint::Toleration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

crate::define_id! {
    /// Identifier for a deployment.
    pub struct DeploymentId("dep-");
}

/// Whether the reconciler acts on the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Active,
    Paused,
}

/// Declarative desired state for a set of pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: DeploymentId,
    pub name: String,
    pub namespace: String,
    pub pack_id: PackId,
    pub pack_version: semver::Version,
    /// Desired replica count; `0` means one pod per eligible node.
    pub replicas: u32,
    #[serde(default)]
    pub pod_labels: Labels,
    #[serde(default)]
    pub pod_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    pub resource_requests: Resources,
    pub resource_limits: Resources,
    #[serde(default)]
    pub scheduling: PodScheduling,
    /// Track the pack's latest published version automatically.
    #[serde(default)]
    pub follow_latest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_version: Option<semver::Version>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_version: Option<semver::Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_backoff_until_ms: Option<u64>,
    pub status: DeploymentState,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub available_replicas: u32,
    #[serde(default)]
    pub total_replicas: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Deployment {
    pub fn is_daemonset(&self) -> bool {
        self.replicas == 0
    }

    /// True when adopting `version` is blocked by an active failure backoff.
    /// Backoff only guards the version that failed; any other version may
    /// be adopted immediately.
    pub fn in_failure_backoff(&self, version: &semver::Version, now_ms: u64) -> bool {
        match (&self.failed_version, self.failure_backoff_until_ms) {
            (Some(failed), Some(until)) => failed == version && now_ms < until,
            _ => false,
        }
    }

    /// Clear crash-loop bookkeeping after a confirmed healthy pod.
    pub fn clear_failure_state(&mut self) {
        self.consecutive_failures = 0;
        self.failed_version = None;
        self.failure_backoff_until_ms = None;
        self.last_successful_version = Some(self.pack_version.clone());
    }
}

#[cfg(test)]
#[path = "deployment_tests.rs"]
mod tests;
