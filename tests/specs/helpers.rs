// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the workspace specs.

use convoy_core::{
    Bundle, ConnectionId, Deployment, DeploymentId, DeploymentState, FakeClock, Labels, Node,
    NodeId, Pack, PackId, PackMetadata, PackVisibility, PodScheduling, Resources, RuntimeTag,
    RuntimeType, Taint, UserId,
};
use convoy_server::auth::ROLE_NODES_WRITE;
use convoy_server::{ConnIdentity, Identity, ServerConfig, ServerCtx, StaticAuthProvider};
use convoy_store::{MemoryStore, Store};
use convoy_wire::{ClientFrame, ClientMessage, NodeRegistration, ServerFrame, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const TOKEN: &str = "node-token";
pub const USER: &str = "machine-user";

pub struct Cluster {
    pub ctx: Arc<ServerCtx<FakeClock>>,
    pub clock: FakeClock,
    pub store: Arc<MemoryStore>,
}

/// A fake agent connection: registry entry plus its outbound frame queue.
pub struct AgentConn {
    pub conn_id: ConnectionId,
    pub rx: mpsc::Receiver<ServerFrame>,
}

pub fn cluster() -> Cluster {
    let clock = FakeClock::new();
    let store = Arc::new(MemoryStore::new());
    let auth = StaticAuthProvider::single(TOKEN, USER);
    let ctx = ServerCtx::new(
        ServerConfig::default(),
        clock.clone(),
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(auth),
    );
    Cluster { ctx, clock, store }
}

/// Open a connection and authenticate it through the real session flow.
pub async fn attach_agent(cluster: &Cluster) -> AgentConn {
    let conn_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel(128);
    cluster.ctx.registry.insert(conn_id, tx, 0);
    convoy_server::session::handle_frame(
        cluster.ctx.as_ref(),
        &conn_id,
        ClientFrame::new(ClientMessage::Authenticate { token: TOKEN.to_string() }),
    )
    .await;
    match rx.try_recv().map(|f| f.msg) {
        Ok(ServerMessage::Authenticated { .. }) => {}
        other => panic!("authentication failed in fixture: {other:?}"),
    }
    AgentConn { conn_id, rx }
}

/// Open a connection bound directly to an agent identity (no frames).
pub fn attach_bound(cluster: &Cluster) -> AgentConn {
    let conn_id = ConnectionId::new();
    let (tx, rx) = mpsc::channel(128);
    cluster.ctx.registry.insert(conn_id, tx, 0);
    cluster.ctx.registry.bind(
        &conn_id,
        ConnIdentity::Agent(Identity::new(USER, vec![ROLE_NODES_WRITE.to_string()])),
    );
    AgentConn { conn_id, rx }
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn registration(name: &str, node_labels: Labels, taints: Vec<Taint>) -> NodeRegistration {
    NodeRegistration {
        name: name.to_string(),
        runtime_type: RuntimeType::Native,
        capabilities: serde_json::Map::new(),
        allocatable: Resources::new(4000, 8192, 10, 100),
        labels: node_labels,
        annotations: Default::default(),
        taints,
    }
}

pub async fn register(cluster: &Cluster, agent: &AgentConn, name: &str) -> Node {
    register_with(cluster, agent, registration(name, Labels::new(), Vec::new())).await
}

pub async fn register_with(
    cluster: &Cluster,
    agent: &AgentConn,
    registration: NodeRegistration,
) -> Node {
    cluster
        .ctx
        .register_node(&agent.conn_id, registration)
        .await
        .unwrap_or_else(|e| panic!("register failed: {e}"))
}

pub fn pack(id: PackId, version: &str, tag: RuntimeTag) -> Pack {
    Pack {
        id,
        name: "imageproc".to_string(),
        version: semver::Version::parse(version).unwrap(),
        runtime_tag: tag,
        bundle: Bundle::Path { bundle_path: "sha256/abc".to_string() },
        metadata: PackMetadata::default(),
        owner_id: UserId::new(USER),
        visibility: PackVisibility::Public,
    }
}

pub fn deployment(pack_id: PackId, version: &str, replicas: u32) -> Deployment {
    Deployment {
        id: DeploymentId::new(),
        name: "api".to_string(),
        namespace: "default".to_string(),
        pack_id,
        pack_version: semver::Version::parse(version).unwrap(),
        replicas,
        pod_labels: Labels::new(),
        pod_annotations: Default::default(),
        tolerations: Vec::new(),
        resource_requests: Resources::new(500, 1024, 1, 1),
        resource_limits: Resources::new(1000, 2048, 1, 1),
        scheduling: PodScheduling::default(),
        follow_latest: false,
        last_successful_version: None,
        consecutive_failures: 0,
        failed_version: None,
        failure_backoff_until_ms: None,
        status: DeploymentState::Active,
        ready_replicas: 0,
        available_replicas: 0,
        total_replicas: 0,
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

pub fn drain(agent: &mut AgentConn) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = agent.rx.try_recv() {
        frames.push(frame);
    }
    frames
}

pub fn deploys_for(frames: &[ServerFrame], node_id: NodeId) -> usize {
    frames
        .iter()
        .filter(|f| matches!(&f.msg, ServerMessage::PodDeploy(a) if a.node_id == node_id))
        .count()
}
