// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Store` trait: every read and write the control plane performs.

use crate::error::StoreError;
use async_trait::async_trait;
use convoy_core::{Deployment, DeploymentId, Node, NodeId, Pack, PackId, Pod, PodId};

/// Persistence operations consumed by the orchestrator.
///
/// The store is the authoritative source for Node / Pack / Pod / Deployment;
/// everything the control plane keeps in memory is a soft cache refreshed on
/// each reconcile tick. Implementations must make `next_incarnation`
/// monotonic per deployment and never reuse a value.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // Nodes
    async fn insert_node(&self, node: Node) -> Result<(), StoreError>;
    async fn get_node(&self, id: &NodeId) -> Result<Node, StoreError>;
    async fn get_node_by_name(&self, name: &str) -> Result<Option<Node>, StoreError>;
    async fn update_node(&self, node: Node) -> Result<(), StoreError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    // Packs (immutable once published)
    async fn put_pack(&self, pack: Pack) -> Result<(), StoreError>;
    async fn get_pack(
        &self,
        id: &PackId,
        version: &semver::Version,
    ) -> Result<Pack, StoreError>;
    async fn latest_pack_version(
        &self,
        id: &PackId,
    ) -> Result<Option<semver::Version>, StoreError>;

    // Pods
    async fn insert_pod(&self, pod: Pod) -> Result<(), StoreError>;
    async fn get_pod(&self, id: &PodId) -> Result<Pod, StoreError>;
    async fn update_pod(&self, pod: Pod) -> Result<(), StoreError>;
    async fn list_pods(&self) -> Result<Vec<Pod>, StoreError>;
    async fn list_pods_by_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<Vec<Pod>, StoreError>;
    async fn list_pods_by_node(&self, node_id: &NodeId) -> Result<Vec<Pod>, StoreError>;

    // Deployments
    async fn insert_deployment(&self, deployment: Deployment) -> Result<(), StoreError>;
    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment, StoreError>;
    async fn update_deployment(&self, deployment: Deployment) -> Result<(), StoreError>;
    async fn list_active_deployments(&self) -> Result<Vec<Deployment>, StoreError>;

    /// Next value of the per-deployment incarnation counter. Strictly
    /// increasing; used to order pod instances and reject stale reports.
    async fn next_incarnation(&self, deployment_id: &DeploymentId) -> Result<u64, StoreError>;
}
