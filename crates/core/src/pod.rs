// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pod: one scheduled instance of a pack.
//!
//! Status lifecycle: `pending → scheduled → starting → running → stopping`
//! with the terminal set `{stopped, failed, evicted}`. Terminal states are
//! absorbing until the pod is garbage-collected.

use crate::deployment::DeploymentId;
use crate::labels::{LabelSelector, Labels};
use crate::node::NodeId;
use crate::pack::PackId;
use crate::resources::Resources;
use crate::taint::Toleration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

crate::define_id! {
    /// Identifier for a pod instance.
    pub struct PodId("pod-");
}

/// Canonical pod status, shared by orchestrator and agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodStatus {
    Pending,
    Scheduled,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Evicted,
}

impl PodStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodStatus::Stopped | PodStatus::Failed | PodStatus::Evicted)
    }

    /// Active pods count toward a deployment's actual replica count.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses that require a bound node.
    pub fn requires_node(&self) -> bool {
        matches!(
            self,
            PodStatus::Scheduled | PodStatus::Starting | PodStatus::Running | PodStatus::Stopping
        )
    }
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodStatus::Pending => "pending",
            PodStatus::Scheduled => "scheduled",
            PodStatus::Starting => "starting",
            PodStatus::Running => "running",
            PodStatus::Stopping => "stopping",
            PodStatus::Stopped => "stopped",
            PodStatus::Failed => "failed",
            PodStatus::Evicted => "evicted",
        };
        write!(f, "{s}")
    }
}

/// Why a pod reached a terminal state. Closed set; crash-loop accounting
/// depends on the application/infrastructure split below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    AppExitOk,
    AppExitError,
    AppCrashed,
    OomKilled,
    DeployFailed,
    RollingUpdate,
    ScaleDown,
    NodeLost,
    EvictedByTaint,
    DeploymentDeleted,
    Cancelled,
}

impl TerminationReason {
    /// Application failures count toward a deployment's consecutive-failure
    /// tally; infrastructure-driven terminations do not.
    pub fn counts_toward_crash_loop(&self) -> bool {
        matches!(
            self,
            TerminationReason::AppExitError
                | TerminationReason::AppCrashed
                | TerminationReason::OomKilled
                | TerminationReason::DeployFailed
        )
    }
}

/// Scheduling constraints carried on a pod (from its deployment template).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodScheduling {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,
}

/// One running or scheduled instance of a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub id: PodId,
    pub pack_id: PackId,
    pub pack_version: semver::Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
    /// Monotonic per-deployment counter; the stale-message tiebreaker.
    pub incarnation: u64,
    pub namespace: String,
    pub status: PodStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub resource_requests: Resources,
    pub resource_limits: Resources,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub scheduling: PodScheduling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Pod {
    /// A recent application-classified failure, for crash-loop accounting.
    pub fn is_recent_app_failure(&self, now_ms: u64, window_ms: u64) -> bool {
        self.status == PodStatus::Failed
            && self
                .termination_reason
                .map(|r| r.counts_toward_crash_loop())
                .unwrap_or(false)
            && now_ms.saturating_sub(self.updated_at_ms) <= window_ms
    }
}

#[cfg(test)]
#[path = "pod_tests.rs"]
mod tests;
