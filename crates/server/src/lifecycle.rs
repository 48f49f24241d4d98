// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node lifecycle: register, reconnect, heartbeat, disconnect, stale sweep.
//!
//! Disconnect only clears the node's connection binding; status ages out
//! through the sweep, so a short network blip never cascades into
//! rescheduling. A heartbeat revives an `unhealthy` node to `online`.

use convoy_core::{
    Clock, ConnectionId, Node, NodeId, NodeStatus, PodStatus, Resources, TerminationReason,
};
use convoy_store::Store;
use convoy_wire::{HeartbeatPayload, NodeMetricsPayload, NodeRegistration};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ctx::ServerCtx;
use crate::error::HandlerError;

/// Silence multiplier after which an unhealthy, disconnected node is
/// declared offline and its pods written off as lost.
const OFFLINE_SILENCE_FACTOR: u32 = 4;

impl<C: Clock> ServerCtx<C> {
    /// Handle `node:register`: create a node owned by the authenticated
    /// user and bind it to this connection.
    pub async fn register_node(
        &self,
        conn_id: &ConnectionId,
        registration: NodeRegistration,
    ) -> Result<Node, HandlerError> {
        let identity = self.agent_identity(conn_id)?;
        if !identity.may_register_nodes() {
            return Err(HandlerError::Forbidden(
                "identity may not register nodes".to_string(),
            ));
        }
        if registration.name.is_empty() {
            return Err(HandlerError::Validation("node name must not be empty".to_string()));
        }
        if self.store.get_node_by_name(&registration.name).await?.is_some() {
            return Err(HandlerError::Conflict(format!(
                "node name already registered: {}",
                registration.name
            )));
        }

        let now = self.clock.epoch_ms();
        let node = Node {
            id: NodeId::new(),
            name: registration.name,
            runtime_type: registration.runtime_type,
            status: NodeStatus::Online,
            last_heartbeat_ms: now,
            capabilities: registration.capabilities,
            allocatable: registration.allocatable,
            allocated: Resources::ZERO,
            labels: registration.labels,
            annotations: registration.annotations,
            taints: registration.taints,
            unschedulable: false,
            connection_id: Some(*conn_id),
            registered_by: identity.user_id,
            registered_at_ms: now,
        };
        self.store.insert_node(node.clone()).await?;
        self.registry.attach(conn_id, node.id);

        info!(node = %node.name, id = %node.id, runtime = %node.runtime_type, "node registered");
        self.trigger_reconcile();
        Ok(node)
    }

    /// Handle `node:reconnect`: rebind an existing node to this connection.
    /// Unknown nodes return NOT_FOUND; the agent falls back to `register`.
    pub async fn reconnect_node(
        &self,
        conn_id: &ConnectionId,
        node_id: NodeId,
    ) -> Result<Node, HandlerError> {
        self.agent_identity(conn_id)?;
        let mut node = self.store.get_node(&node_id).await?;

        node.connection_id = Some(*conn_id);
        node.status = NodeStatus::Online;
        node.last_heartbeat_ms = self.clock.epoch_ms();
        self.store.update_node(node.clone()).await?;
        self.registry.attach(conn_id, node.id);

        info!(node = %node.name, id = %node.id, "node reconnected");
        self.trigger_reconcile();
        Ok(node)
    }

    /// Handle `node:heartbeat`. Only the connection bound to the node may
    /// report for it.
    pub async fn heartbeat(
        &self,
        conn_id: &ConnectionId,
        payload: HeartbeatPayload,
    ) -> Result<u64, HandlerError> {
        self.agent_identity(conn_id)?;
        if !self.registry.is_bound_to(conn_id, &payload.node_id) {
            return Err(HandlerError::Forbidden(format!(
                "connection is not bound to node {}",
                payload.node_id
            )));
        }

        let mut node = self.store.get_node(&payload.node_id).await?;
        let now = self.clock.epoch_ms();
        node.last_heartbeat_ms = now;

        if let Some(allocated) = payload.allocated {
            if !allocated.fits_within(&node.allocatable) {
                warn!(
                    node = %node.name,
                    "heartbeat reported allocated above allocatable, clamping"
                );
            }
            node.allocated = allocated.clamped_to(&node.allocatable);
        }

        let before = node.status;
        node.fold_heartbeat_status(payload.status);
        if before != node.status {
            info!(node = %node.name, from = %before, to = %node.status, "node status changed by heartbeat");
        }

        self.store.update_node(node).await?;
        Ok(now)
    }

    /// Record a `metrics:node` frame. Latest-sample-wins; consumed by
    /// admin tooling, never by scheduling decisions.
    pub fn record_metrics(&self, payload: NodeMetricsPayload) {
        self.metrics.lock().insert(payload.node_id, payload);
    }

    /// Latest metrics frame for a node, if any arrived.
    pub fn node_metrics(&self, node_id: &NodeId) -> Option<NodeMetricsPayload> {
        self.metrics.lock().get(node_id).cloned()
    }

    /// Channel-close hook: clear the connection binding on every node that
    /// was attached to the dropped connection. Status is left for the sweep.
    pub async fn handle_node_disconnect(&self, conn_id: &ConnectionId, node_ids: &[NodeId]) {
        for node_id in node_ids {
            match self.store.get_node(node_id).await {
                Ok(mut node) => {
                    if node.connection_id == Some(*conn_id) {
                        node.connection_id = None;
                        if let Err(e) = self.store.update_node(node).await {
                            warn!(node = %node_id, error = %e, "failed to clear connection on disconnect");
                        } else {
                            debug!(node = %node_id, "connection cleared on disconnect");
                        }
                    }
                }
                Err(e) => warn!(node = %node_id, error = %e, "disconnect hook: node lookup failed"),
            }
        }
    }

    /// One pass of the stale sweep. Returns how many nodes changed status.
    ///
    /// Nodes silent past `heartbeat_timeout` become `unhealthy` (statuses
    /// `offline` and `suspect` are left alone). Unhealthy nodes with no
    /// connection and silence past 4× the timeout become `offline`; their
    /// non-terminal pods fail with `node_lost` and their allocations are
    /// returned.
    pub async fn sweep_stale_nodes(&self) -> usize {
        let nodes = match self.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "stale sweep: listing nodes failed");
                return 0;
            }
        };

        let now = self.clock.epoch_ms();
        let timeout_ms = self.config.heartbeat_timeout.as_millis() as u64;
        let offline_ms = timeout_ms * OFFLINE_SILENCE_FACTOR as u64;
        let mut transitions = 0;

        for mut node in nodes {
            if matches!(node.status, NodeStatus::Offline | NodeStatus::Suspect) {
                continue;
            }
            let silence = now.saturating_sub(node.last_heartbeat_ms);
            if silence <= timeout_ms {
                continue;
            }

            if node.status == NodeStatus::Unhealthy {
                if node.connection_id.is_none() && silence > offline_ms {
                    warn!(node = %node.name, silence_ms = silence, "node offline, failing its pods");
                    node.status = NodeStatus::Offline;
                    node.connection_id = None;
                    self.fail_pods_on_lost_node(&mut node, now).await;
                    if let Err(e) = self.store.update_node(node).await {
                        warn!(error = %e, "stale sweep: offline transition failed");
                    } else {
                        transitions += 1;
                        self.trigger_reconcile();
                    }
                }
                continue;
            }

            warn!(
                node = %node.name,
                silence_ms = silence,
                from = %node.status,
                "node missed heartbeats, marking unhealthy"
            );
            node.status = NodeStatus::Unhealthy;
            if let Err(e) = self.store.update_node(node).await {
                warn!(error = %e, "stale sweep: unhealthy transition failed");
            } else {
                transitions += 1;
            }
        }

        transitions
    }

    /// Fail every non-terminal pod on a lost node and return its resources.
    async fn fail_pods_on_lost_node(&self, node: &mut Node, now: u64) {
        let pods = match self.store.list_pods_by_node(&node.id).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(node = %node.name, error = %e, "failed to list pods of lost node");
                return;
            }
        };
        for mut pod in pods {
            if pod.status.is_terminal() {
                continue;
            }
            pod.status = PodStatus::Failed;
            pod.termination_reason = Some(TerminationReason::NodeLost);
            pod.status_message = Some(format!("node {} went offline", node.name));
            pod.updated_at_ms = now;
            node.allocated = node.allocated.saturating_sub(&pod.resource_requests);
            self.scheduler.release(&node.id, &pod.resource_requests);
            if let Err(e) = self.store.update_pod(pod).await {
                warn!(node = %node.name, error = %e, "failed to mark pod lost");
            }
        }
    }

    /// Periodic sweep task: stale nodes plus expired dispatch RPCs.
    pub async fn run_stale_sweep(self: Arc<Self>) {
        let cancel = self.shutdown_token();
        let mut ticker = tokio::time::interval(self.config.stale_sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_stale_nodes().await;
                    self.expire_rpcs().await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
