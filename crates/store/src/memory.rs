// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store, keyed HashMaps under one mutex.
//!
//! Backs tests and single-node deployments. Locks are released before any
//! `.await` point; every method body is synchronous inside the lock.

use crate::error::StoreError;
use crate::store::Store;
use async_trait::async_trait;
use convoy_core::{
    Deployment, DeploymentId, DeploymentState, Node, NodeId, Pack, PackId, Pod, PodId,
};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    packs: HashMap<(PackId, semver::Version), Pack>,
    pods: HashMap<PodId, Pod>,
    deployments: HashMap<DeploymentId, Deployment>,
    incarnations: HashMap<DeploymentId, u64>,
}

/// HashMap-backed [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_node(&self, node: Node) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.nodes.values().any(|n| n.name == node.name) {
            return Err(StoreError::Conflict(format!(
                "node name already registered: {}",
                node.name
            )));
        }
        inner.nodes.insert(node.id, node);
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<Node, StoreError> {
        self.inner
            .lock()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("node", id.as_str()))
    }

    async fn get_node_by_name(&self, name: &str) -> Result<Option<Node>, StoreError> {
        Ok(self
            .inner
            .lock()
            .nodes
            .values()
            .find(|n| n.name == name)
            .cloned())
    }

    async fn update_node(&self, node: Node) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(&node.id) {
            return Err(StoreError::not_found("node", node.id.as_str()));
        }
        inner.nodes.insert(node.id, node);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.inner.lock().nodes.values().cloned().collect())
    }

    async fn put_pack(&self, pack: Pack) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let key = (pack.id, pack.version.clone());
        if inner.packs.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "pack {} version {} already published",
                pack.name, pack.version
            )));
        }
        inner.packs.insert(key, pack);
        Ok(())
    }

    async fn get_pack(
        &self,
        id: &PackId,
        version: &semver::Version,
    ) -> Result<Pack, StoreError> {
        self.inner
            .lock()
            .packs
            .get(&(*id, version.clone()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("pack", format!("{id}@{version}")))
    }

    async fn latest_pack_version(
        &self,
        id: &PackId,
    ) -> Result<Option<semver::Version>, StoreError> {
        Ok(self
            .inner
            .lock()
            .packs
            .keys()
            .filter(|(pack_id, _)| pack_id == id)
            .map(|(_, version)| version.clone())
            .max())
    }

    async fn insert_pod(&self, pod: Pod) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.pods.contains_key(&pod.id) {
            return Err(StoreError::Conflict(format!("pod already exists: {}", pod.id)));
        }
        inner.pods.insert(pod.id, pod);
        Ok(())
    }

    async fn get_pod(&self, id: &PodId) -> Result<Pod, StoreError> {
        self.inner
            .lock()
            .pods
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("pod", id.as_str()))
    }

    async fn update_pod(&self, pod: Pod) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.pods.contains_key(&pod.id) {
            return Err(StoreError::not_found("pod", pod.id.as_str()));
        }
        inner.pods.insert(pod.id, pod);
        Ok(())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, StoreError> {
        Ok(self.inner.lock().pods.values().cloned().collect())
    }

    async fn list_pods_by_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<Vec<Pod>, StoreError> {
        Ok(self
            .inner
            .lock()
            .pods
            .values()
            .filter(|p| p.deployment_id.as_ref() == Some(deployment_id))
            .cloned()
            .collect())
    }

    async fn list_pods_by_node(&self, node_id: &NodeId) -> Result<Vec<Pod>, StoreError> {
        Ok(self
            .inner
            .lock()
            .pods
            .values()
            .filter(|p| p.node_id.as_ref() == Some(node_id))
            .cloned()
            .collect())
    }

    async fn insert_deployment(&self, deployment: Deployment) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.deployments.contains_key(&deployment.id) {
            return Err(StoreError::Conflict(format!(
                "deployment already exists: {}",
                deployment.id
            )));
        }
        inner.deployments.insert(deployment.id, deployment);
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment, StoreError> {
        self.inner
            .lock()
            .deployments
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("deployment", id.as_str()))
    }

    async fn update_deployment(&self, deployment: Deployment) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.deployments.contains_key(&deployment.id) {
            return Err(StoreError::not_found("deployment", deployment.id.as_str()));
        }
        inner.deployments.insert(deployment.id, deployment);
        Ok(())
    }

    async fn list_active_deployments(&self) -> Result<Vec<Deployment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .deployments
            .values()
            .filter(|d| d.status == DeploymentState::Active)
            .cloned()
            .collect())
    }

    async fn next_incarnation(&self, deployment_id: &DeploymentId) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let counter = inner.incarnations.entry(*deployment_id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
