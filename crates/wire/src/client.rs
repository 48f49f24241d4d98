// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messages sent by node agents to the orchestrator.

use convoy_core::{
    Labels, NodeId, NodeStatus, PodId, PodStatus, Resources, RuntimeType, Taint,
    TerminationReason,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registration request for a node not yet known to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    pub name: String,
    pub runtime_type: RuntimeType,
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    pub allocatable: Resources,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

/// Periodic liveness report. `allocated` replaces the stored vector when
/// present; `status` folds per the heartbeat status rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub node_id: NodeId,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_pods: Option<Vec<PodId>>,
}

/// Unsolicited pod status change. Carries the incarnation from the deploy
/// assignment so the orchestrator can discard reports from superseded
/// instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusReport {
    pub pod_id: PodId,
    pub status: PodStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<TerminationReason>,
    pub incarnation: u64,
}

/// Worker pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub slots: u32,
    pub busy: u32,
}

/// Per-pod execution counters maintained by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetrics {
    pub pod_id: PodId,
    pub execution_count: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub total_execution_time_ms: u64,
    pub restart_count: u64,
}

/// Periodic resource/pool/pod statistics frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetricsPayload {
    pub node_id: NodeId,
    pub timestamp: u64,
    pub allocated: Resources,
    pub pool: PoolStats,
    #[serde(default)]
    pub pods: Vec<PodMetrics>,
}

impl PodMetrics {
    pub fn new(pod_id: PodId) -> Self {
        Self { pod_id, ..Default::default() }
    }
}

/// Every message a node agent may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
    #[serde(rename = "auth:authenticate")]
    Authenticate { token: String },
    #[serde(rename = "node:register")]
    NodeRegister(NodeRegistration),
    #[serde(rename = "node:reconnect", rename_all = "camelCase")]
    NodeReconnect { node_id: NodeId },
    #[serde(rename = "node:heartbeat")]
    NodeHeartbeat(HeartbeatPayload),
    #[serde(rename = "pod:deploy:success", rename_all = "camelCase")]
    PodDeploySuccess { pod_id: PodId },
    #[serde(rename = "pod:deploy:error", rename_all = "camelCase")]
    PodDeployError { pod_id: PodId, message: String },
    #[serde(rename = "pod:stop:success", rename_all = "camelCase")]
    PodStopSuccess { pod_id: PodId },
    #[serde(rename = "pod:stop:error", rename_all = "camelCase")]
    PodStopError { pod_id: PodId, message: String },
    #[serde(rename = "pod:status:update")]
    PodStatusUpdate(PodStatusReport),
    #[serde(rename = "metrics:node")]
    NodeMetrics(NodeMetricsPayload),
}

impl ClientMessage {
    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::Pong { .. } => "pong",
            ClientMessage::Authenticate { .. } => "auth:authenticate",
            ClientMessage::NodeRegister(_) => "node:register",
            ClientMessage::NodeReconnect { .. } => "node:reconnect",
            ClientMessage::NodeHeartbeat(_) => "node:heartbeat",
            ClientMessage::PodDeploySuccess { .. } => "pod:deploy:success",
            ClientMessage::PodDeployError { .. } => "pod:deploy:error",
            ClientMessage::PodStopSuccess { .. } => "pod:stop:success",
            ClientMessage::PodStopError { .. } => "pod:stop:error",
            ClientMessage::PodStatusUpdate(_) => "pod:status:update",
            ClientMessage::NodeMetrics(_) => "metrics:node",
        }
    }

    /// True for messages that require an authenticated agent identity.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            ClientMessage::Ping { .. }
                | ClientMessage::Pong { .. }
                | ClientMessage::Authenticate { .. }
        )
    }
}
