// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for server unit tests.

use convoy_core::{
    Bundle, Clock, Deployment, DeploymentId, DeploymentState, FakeClock, Labels, Node, NodeId,
    Pack, PackId, PackMetadata, PackVisibility, Pod, PodId, PodScheduling, PodStatus, Resources,
    RuntimeTag, RuntimeType, TerminationReason, UserId,
};
use convoy_store::{MemoryStore, Store};
use convoy_wire::{NodeRegistration, ServerFrame};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::{Identity, StaticAuthProvider, ROLE_NODES_WRITE};
use crate::config::ServerConfig;
use crate::ctx::ServerCtx;
use crate::registry::ConnIdentity;

pub(crate) const TEST_TOKEN: &str = "secret-token";
pub(crate) const TEST_USER: &str = "machine-user";

pub(crate) struct TestContext {
    pub ctx: Arc<ServerCtx<FakeClock>>,
    pub clock: FakeClock,
    pub store: Arc<MemoryStore>,
}

pub(crate) fn setup() -> TestContext {
    setup_with_config(ServerConfig::default())
}

pub(crate) fn setup_with_config(config: ServerConfig) -> TestContext {
    let clock = FakeClock::new();
    let store = Arc::new(MemoryStore::new());
    let auth = StaticAuthProvider::single(TEST_TOKEN, TEST_USER);
    let ctx = ServerCtx::new(
        config,
        clock.clone(),
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(auth),
    );
    TestContext { ctx, clock, store }
}

/// Insert a connection already bound to an agent identity with node
/// registration rights. Returns the outbound queue receiver so tests can
/// observe dispatched frames.
pub(crate) fn connect(t: &TestContext) -> (convoy_core::ConnectionId, mpsc::Receiver<ServerFrame>) {
    let conn_id = convoy_core::ConnectionId::new();
    let (tx, rx) = mpsc::channel(64);
    t.ctx.registry.insert(conn_id, tx, t.clock.epoch_ms());
    t.ctx.registry.bind(
        &conn_id,
        ConnIdentity::Agent(Identity::new(TEST_USER, vec![ROLE_NODES_WRITE.to_string()])),
    );
    (conn_id, rx)
}

/// Insert an unauthenticated connection.
pub(crate) fn connect_unauthenticated(
    t: &TestContext,
) -> (convoy_core::ConnectionId, mpsc::Receiver<ServerFrame>) {
    let conn_id = convoy_core::ConnectionId::new();
    let (tx, rx) = mpsc::channel(64);
    t.ctx.registry.insert(conn_id, tx, t.clock.epoch_ms());
    (conn_id, rx)
}

pub(crate) fn registration(name: &str) -> NodeRegistration {
    NodeRegistration {
        name: name.to_string(),
        runtime_type: RuntimeType::Native,
        capabilities: serde_json::Map::new(),
        allocatable: Resources::new(4000, 8192, 10, 100),
        labels: Labels::new(),
        annotations: Default::default(),
        taints: Vec::new(),
    }
}

pub(crate) fn pack_fixture(id: PackId, version: &str) -> Pack {
    Pack {
        id,
        name: "svc".to_string(),
        version: semver::Version::parse(version).unwrap(),
        runtime_tag: RuntimeTag::Universal,
        bundle: Bundle::Path { bundle_path: "sha256/x".to_string() },
        metadata: PackMetadata::default(),
        owner_id: UserId::new(TEST_USER),
        visibility: PackVisibility::Public,
    }
}

pub(crate) fn deployment_fixture(pack_id: PackId, version: &str, replicas: u32) -> Deployment {
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

pub(crate) fn pod_fixture(dep: &Deployment, incarnation: u64, status: PodStatus) -> Pod {
    Pod {
        id: PodId::new(),
        pack_id: dep.pack_id,
        pack_version: dep.pack_version.clone(),
        deployment_id: Some(dep.id),
        incarnation,
        namespace: dep.namespace.clone(),
        status,
        node_id: None,
        resource_requests: dep.resource_requests,
        resource_limits: dep.resource_limits,
        labels: Labels::new(),
        annotations: Default::default(),
        tolerations: Vec::new(),
        scheduling: PodScheduling::default(),
        termination_reason: None,
        status_message: None,
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

pub(crate) fn failed_pod(dep: &Deployment, incarnation: u64, at_ms: u64) -> Pod {
    let mut pod = pod_fixture(dep, incarnation, PodStatus::Failed);
    pod.node_id = Some(NodeId::new());
    pod.termination_reason = Some(TerminationReason::AppCrashed);
    pod.updated_at_ms = at_ms;
    pod
}

/// Register a node through the real handler, bound to `conn_id`.
pub(crate) async fn register_node(
    t: &TestContext,
    conn_id: &convoy_core::ConnectionId,
    name: &str,
) -> Node {
    t.ctx
        .register_node(conn_id, registration(name))
        .await
        .unwrap_or_else(|e| panic!("register {name} failed: {e}"))
}

/// Drain every frame currently queued on a connection.
pub(crate) fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

