// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry: in-memory index of attached channels.
//!
//! Pure bookkeeping under a single mutex: the registry never touches the
//! store and knows nothing about a node's database status. It maintains
//! both directions of the index (connection → identity + bound node set,
//! node → connection) so `send_to_node` is O(1).

use convoy_core::{ConnectionId, NodeId, PodId};
use convoy_wire::ServerFrame;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::Identity;

/// Who a connection speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnIdentity {
    Unauthenticated,
    Agent(Identity),
    /// In-pod connection (service mesh side); carried for completeness,
    /// node-scope handlers reject it.
    Pod { pod_id: PodId, service_id: String },
}

impl ConnIdentity {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, ConnIdentity::Unauthenticated)
    }
}

struct ConnectionEntry {
    tx: mpsc::Sender<ServerFrame>,
    identity: ConnIdentity,
    node_ids: HashSet<NodeId>,
    connected_at_ms: u64,
    last_activity_ms: u64,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_node: HashMap<NodeId, ConnectionId>,
}

/// Shared index of live connections. All mutation is serialized by the
/// inner mutex; sends are non-blocking (`try_send` into the per-connection
/// writer queue).
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection with its outbound queue.
    pub fn insert(&self, id: ConnectionId, tx: mpsc::Sender<ServerFrame>, now_ms: u64) {
        let mut inner = self.inner.lock();
        inner.connections.insert(
            id,
            ConnectionEntry {
                tx,
                identity: ConnIdentity::Unauthenticated,
                node_ids: HashSet::new(),
                connected_at_ms: now_ms,
                last_activity_ms: now_ms,
            },
        );
    }

    /// Bind an authenticated identity to a connection.
    pub fn bind(&self, id: &ConnectionId, identity: ConnIdentity) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(id) {
            Some(entry) => {
                entry.identity = identity;
                true
            }
            None => false,
        }
    }

    pub fn identity(&self, id: &ConnectionId) -> Option<ConnIdentity> {
        self.inner
            .lock()
            .connections
            .get(id)
            .map(|entry| entry.identity.clone())
    }

    /// Record inbound traffic for idle tracking.
    pub fn touch(&self, id: &ConnectionId, now_ms: u64) {
        if let Some(entry) = self.inner.lock().connections.get_mut(id) {
            entry.last_activity_ms = now_ms;
        }
    }

    /// Bind a node to a connection (both directions). A node rebinding to a
    /// new connection is detached from its previous one.
    pub fn attach(&self, id: &ConnectionId, node_id: NodeId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.connections.contains_key(id) {
            return false;
        }
        if let Some(previous) = inner.by_node.insert(node_id, *id) {
            if previous != *id {
                if let Some(entry) = inner.connections.get_mut(&previous) {
                    entry.node_ids.remove(&node_id);
                }
                debug!(node = %node_id, old = %previous, new = %id, "node rebound to new connection");
            }
        }
        if let Some(entry) = inner.connections.get_mut(id) {
            entry.node_ids.insert(node_id);
        }
        true
    }

    pub fn detach(&self, id: &ConnectionId, node_id: &NodeId) {
        let mut inner = self.inner.lock();
        if inner.by_node.get(node_id) == Some(id) {
            inner.by_node.remove(node_id);
        }
        if let Some(entry) = inner.connections.get_mut(id) {
            entry.node_ids.remove(node_id);
        }
    }

    /// Connection currently bound to a node, if any.
    pub fn node_connection(&self, node_id: &NodeId) -> Option<ConnectionId> {
        self.inner.lock().by_node.get(node_id).copied()
    }

    /// True when `id` is the connection bound to `node_id`.
    pub fn is_bound_to(&self, id: &ConnectionId, node_id: &NodeId) -> bool {
        self.inner.lock().by_node.get(node_id) == Some(id)
    }

    /// Queue a frame to one connection. Returns `false` when the target is
    /// no longer present (or its writer queue is gone/full).
    pub fn send_to_connection(&self, id: &ConnectionId, frame: &ServerFrame) -> bool {
        let tx = {
            let inner = self.inner.lock();
            match inner.connections.get(id) {
                Some(entry) => entry.tx.clone(),
                None => return false,
            }
        };
        match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %id, kind = frame.msg.kind(), error = %e, "outbound queue send failed");
                false
            }
        }
    }

    /// Queue a frame to the connection owning a node.
    pub fn send_to_node(&self, node_id: &NodeId, frame: &ServerFrame) -> bool {
        match self.node_connection(node_id) {
            Some(conn_id) => self.send_to_connection(&conn_id, frame),
            None => false,
        }
    }

    /// Queue a frame to every authenticated connection passing `filter`.
    /// Returns how many connections were reached.
    pub fn broadcast(
        &self,
        frame: &ServerFrame,
        filter: impl Fn(&ConnIdentity) -> bool,
    ) -> usize {
        let targets: Vec<mpsc::Sender<ServerFrame>> = {
            let inner = self.inner.lock();
            inner
                .connections
                .values()
                .filter(|entry| entry.identity.is_authenticated() && filter(&entry.identity))
                .map(|entry| entry.tx.clone())
                .collect()
        };
        let mut reached = 0;
        for tx in targets {
            if tx.try_send(frame.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    /// All live connection ids (for shutdown fan-out).
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.lock().connections.keys().copied().collect()
    }

    /// Seconds-grade age info for a connection, for diagnostics.
    pub fn activity(&self, id: &ConnectionId) -> Option<(u64, u64)> {
        self.inner
            .lock()
            .connections
            .get(id)
            .map(|e| (e.connected_at_ms, e.last_activity_ms))
    }

    /// Node ids currently bound to a connection (disconnect hooks run over
    /// this list before the entry is removed).
    pub fn bound_nodes(&self, id: &ConnectionId) -> Vec<NodeId> {
        self.inner
            .lock()
            .connections
            .get(id)
            .map(|entry| entry.node_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop a connection, returning the node ids that were bound to it.
    /// The caller runs the node-lifecycle disconnect hook for each before
    /// this entry is forgotten.
    pub fn remove(&self, id: &ConnectionId) -> Vec<NodeId> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.connections.remove(id) else {
            return Vec::new();
        };
        let node_ids: Vec<NodeId> = entry.node_ids.into_iter().collect();
        for node_id in &node_ids {
            if inner.by_node.get(node_id) == Some(id) {
                inner.by_node.remove(node_id);
            }
        }
        node_ids
    }

}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
