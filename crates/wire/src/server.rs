// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messages sent by the orchestrator to node agents.

use crate::error::ErrorPayload;
use convoy_core::{
    Bundle, ConnectionId, Labels, Node, NodeId, Pack, PackId, PackMetadata, PodId, Resources,
    RuntimeTag, TerminationReason, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pack fields a node needs to execute an assignment. A trimmed view of
/// [`Pack`] without ownership/visibility, which are control-plane concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackManifest {
    pub id: PackId,
    pub name: String,
    pub version: semver::Version,
    pub runtime_tag: RuntimeTag,
    #[serde(flatten)]
    pub bundle: Bundle,
    #[serde(default)]
    pub metadata: PackMetadata,
}

impl From<&Pack> for PackManifest {
    fn from(pack: &Pack) -> Self {
        Self {
            id: pack.id,
            name: pack.name.clone(),
            version: pack.version.clone(),
            runtime_tag: pack.runtime_tag,
            bundle: pack.bundle.clone(),
            metadata: pack.metadata.clone(),
        }
    }
}

/// Work assignment pushed to the node that owns a pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodAssignment {
    pub pod_id: PodId,
    pub node_id: NodeId,
    pub pack: PackManifest,
    pub resource_requests: Resources,
    pub resource_limits: Resources,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub namespace: String,
    pub incarnation: u64,
}

/// Every message the orchestrator may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        connection_id: ConnectionId,
        requires_auth: bool,
    },
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
    #[serde(rename = "auth:authenticated", rename_all = "camelCase")]
    Authenticated { user_id: UserId, roles: Vec<String> },
    #[serde(rename = "auth:error")]
    AuthError(ErrorPayload),
    #[serde(rename = "node:register:ack")]
    NodeRegisterAck { node: Box<Node> },
    #[serde(rename = "node:register:error")]
    NodeRegisterError(ErrorPayload),
    #[serde(rename = "node:reconnect:ack")]
    NodeReconnectAck { node: Box<Node> },
    #[serde(rename = "node:reconnect:error")]
    NodeReconnectError(ErrorPayload),
    #[serde(rename = "node:heartbeat:ack")]
    NodeHeartbeatAck { timestamp: u64 },
    #[serde(rename = "node:heartbeat:error")]
    NodeHeartbeatError(ErrorPayload),
    #[serde(rename = "pod:deploy")]
    PodDeploy(PodAssignment),
    #[serde(rename = "pod:stop", rename_all = "camelCase")]
    PodStop {
        pod_id: PodId,
        reason: TerminationReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "disconnect")]
    Disconnect { reason: String },
}

impl ServerMessage {
    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Ping { .. } => "ping",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Authenticated { .. } => "auth:authenticated",
            ServerMessage::AuthError(_) => "auth:error",
            ServerMessage::NodeRegisterAck { .. } => "node:register:ack",
            ServerMessage::NodeRegisterError(_) => "node:register:error",
            ServerMessage::NodeReconnectAck { .. } => "node:reconnect:ack",
            ServerMessage::NodeReconnectError(_) => "node:reconnect:error",
            ServerMessage::NodeHeartbeatAck { .. } => "node:heartbeat:ack",
            ServerMessage::NodeHeartbeatError(_) => "node:heartbeat:error",
            ServerMessage::PodDeploy(_) => "pod:deploy",
            ServerMessage::PodStop { .. } => "pod:stop",
            ServerMessage::Error(_) => "error",
            ServerMessage::Disconnect { .. } => "disconnect",
        }
    }
}
