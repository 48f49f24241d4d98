// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node record and status machine.
//!
//! A node is a worker process (native or browser runtime) attached to the
//! orchestrator over a persistent channel. Status transitions are driven by
//! register/reconnect, heartbeats, the stale sweep, and channel close.

use crate::id::UserId;
use crate::labels::Labels;
use crate::resources::Resources;
use crate::taint::Taint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

crate::define_id! {
    /// Stable node identifier. Immutable for the life of the node.
    pub struct NodeId("node-");
}

crate::define_id! {
    /// Transient identifier for one channel connection.
    pub struct ConnectionId("conn-");
}

/// Kind of runtime hosting the node's worker slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Native,
    Browser,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Native => write!(f, "native"),
            RuntimeType::Browser => write!(f, "browser"),
        }
    }
}

/// Server-side node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Suspect,
    Unhealthy,
    Draining,
    Maintenance,
    Offline,
}

impl NodeStatus {
    /// Statuses a node may report about itself in a heartbeat. Anything
    /// else in a heartbeat is coerced (see [`Node::fold_heartbeat_status`]).
    pub fn is_heartbeat_reportable(&self) -> bool {
        matches!(
            self,
            NodeStatus::Online | NodeStatus::Draining | NodeStatus::Maintenance
        )
    }

    /// Statuses that may keep hosting already-placed pods.
    pub fn can_host_pods(&self) -> bool {
        matches!(
            self,
            NodeStatus::Online | NodeStatus::Draining | NodeStatus::Maintenance
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Online => "online",
            NodeStatus::Suspect => "suspect",
            NodeStatus::Unhealthy => "unhealthy",
            NodeStatus::Draining => "draining",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// A worker node attached (or previously attached) to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// Globally unique, chosen by the operator.
    pub name: String,
    pub runtime_type: RuntimeType,
    pub status: NodeStatus,
    pub last_heartbeat_ms: u64,
    /// Opaque capability map reported at registration. The scheduler only
    /// interprets the `version` key (runtime version for pack gating).
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    pub allocatable: Resources,
    pub allocated: Resources,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    pub registered_by: UserId,
    pub registered_at_ms: u64,
}

impl Node {
    /// True when the scheduler may place new pods here.
    pub fn is_schedulable(&self) -> bool {
        self.status == NodeStatus::Online && !self.unschedulable
    }

    /// Runtime version from the capability map, when reported and parseable.
    pub fn runtime_version(&self) -> Option<semver::Version> {
        self.capabilities
            .get("version")
            .and_then(|v| v.as_str())
            .and_then(|s| semver::Version::parse(s).ok())
    }

    /// Apply the status carried (or omitted) by a heartbeat.
    ///
    /// A reported `online` / `draining` / `maintenance` is applied verbatim.
    /// Anything else preserves an existing `draining` / `maintenance` and
    /// otherwise coerces to `online`, so a heartbeat always revives an
    /// `unhealthy` node.
    pub fn fold_heartbeat_status(&mut self, reported: Option<NodeStatus>) {
        match reported {
            Some(status) if status.is_heartbeat_reportable() => {
                self.status = status;
            }
            _ => {
                if !matches!(self.status, NodeStatus::Draining | NodeStatus::Maintenance) {
                    self.status = NodeStatus::Online;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
