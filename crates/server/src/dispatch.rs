// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch: push work to nodes and absorb their reports.
//!
//! `pod:deploy` / `pod:stop` are correlated RPCs with a deadline; replies
//! and unsolicited `pod:status:update` frames drive pod state in the store.
//! A status update carrying an incarnation behind the store's pod is a
//! leftover from a superseded instance and is discarded.

use convoy_core::{
    Clock, ConnectionId, CorrelationId, NodeId, Pack, Pod, PodId, PodStatus, TerminationReason,
};
use convoy_store::Store;
use convoy_wire::{PodAssignment, PodStatusReport, ServerFrame, ServerMessage};
use tracing::{debug, info, warn};

use crate::ctx::ServerCtx;
use crate::error::HandlerError;

/// What an in-flight RPC was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RpcKind {
    Deploy,
    Stop,
}

/// One outstanding pod:deploy / pod:stop awaiting its reply.
#[derive(Debug, Clone)]
pub(crate) struct InFlightRpc {
    pub kind: RpcKind,
    pub pod_id: PodId,
    pub node_id: NodeId,
    pub deadline_ms: u64,
}

impl<C: Clock> ServerCtx<C> {
    /// Send `pod:deploy` to the node owning `pod`. The pod must already be
    /// `scheduled` in the store. Returns false when the node has no live
    /// connection; the pod is failed with `deploy_failed` so the next
    /// reconcile tick replaces it.
    pub async fn dispatch_deploy(&self, pod: &Pod, pack: &Pack) -> bool {
        let Some(node_id) = pod.node_id else {
            warn!(pod = %pod.id, "dispatch_deploy on unassigned pod");
            return false;
        };

        let assignment = PodAssignment {
            pod_id: pod.id,
            node_id,
            pack: pack.into(),
            resource_requests: pod.resource_requests,
            resource_limits: pod.resource_limits,
            labels: pod.labels.clone(),
            annotations: pod.annotations.clone(),
            namespace: pod.namespace.clone(),
            incarnation: pod.incarnation,
        };

        let correlation_id = CorrelationId::new();
        let deadline_ms = self.clock.epoch_ms() + self.config.rpc_timeout.as_millis() as u64;
        self.rpcs.lock().insert(
            correlation_id,
            InFlightRpc { kind: RpcKind::Deploy, pod_id: pod.id, node_id, deadline_ms },
        );

        let frame =
            ServerFrame::correlated(ServerMessage::PodDeploy(assignment), correlation_id);
        if self.registry.send_to_node(&node_id, &frame) {
            info!(pod = %pod.id, node = %node_id, incarnation = pod.incarnation, "pod:deploy dispatched");
            return true;
        }

        self.rpcs.lock().remove(&correlation_id);
        warn!(pod = %pod.id, node = %node_id, "pod:deploy undeliverable, failing pod");
        self.fail_pod(&pod.id, TerminationReason::DeployFailed, "node connection unavailable")
            .await;
        false
    }

    /// Send `pod:stop` to the node owning `pod`.
    pub async fn dispatch_stop(
        &self,
        pod: &Pod,
        reason: TerminationReason,
        message: Option<String>,
    ) -> bool {
        let Some(node_id) = pod.node_id else {
            return false;
        };

        let correlation_id = CorrelationId::new();
        let deadline_ms = self.clock.epoch_ms() + self.config.rpc_timeout.as_millis() as u64;
        self.rpcs.lock().insert(
            correlation_id,
            InFlightRpc { kind: RpcKind::Stop, pod_id: pod.id, node_id, deadline_ms },
        );

        let frame = ServerFrame::correlated(
            ServerMessage::PodStop { pod_id: pod.id, reason, message },
            correlation_id,
        );
        let sent = self.registry.send_to_node(&node_id, &frame);
        if sent {
            info!(pod = %pod.id, node = %node_id, reason = ?reason, "pod:stop dispatched");
        } else {
            self.rpcs.lock().remove(&correlation_id);
            debug!(pod = %pod.id, node = %node_id, "pod:stop undeliverable (node not attached)");
        }
        sent
    }

    /// Handle `pod:deploy:success` / `pod:deploy:error` replies.
    pub async fn handle_deploy_reply(
        &self,
        correlation_id: Option<CorrelationId>,
        pod_id: PodId,
        error: Option<String>,
    ) {
        self.settle_rpc(correlation_id, RpcKind::Deploy);
        match error {
            None => debug!(pod = %pod_id, "deploy acknowledged"),
            Some(message) => {
                warn!(pod = %pod_id, message, "deploy failed on node");
                self.fail_pod(&pod_id, TerminationReason::DeployFailed, &message).await;
            }
        }
    }

    /// Handle `pod:stop:success` / `pod:stop:error` replies. The pod's
    /// state is driven by the subsequent `pod:status:update`, so replies
    /// only settle the RPC.
    pub async fn handle_stop_reply(
        &self,
        correlation_id: Option<CorrelationId>,
        pod_id: PodId,
        error: Option<String>,
    ) {
        self.settle_rpc(correlation_id, RpcKind::Stop);
        if let Some(message) = error {
            warn!(pod = %pod_id, message, "stop failed on node");
        }
    }

    fn settle_rpc(&self, correlation_id: Option<CorrelationId>, expected: RpcKind) {
        let Some(correlation_id) = correlation_id else {
            return;
        };
        let mut rpcs = self.rpcs.lock();
        match rpcs.get(&correlation_id) {
            Some(rpc) if rpc.kind == expected => {
                rpcs.remove(&correlation_id);
            }
            Some(rpc) => {
                warn!(correlation = %correlation_id, kind = ?rpc.kind, "reply kind mismatch, dropping RPC");
                rpcs.remove(&correlation_id);
            }
            None => debug!(correlation = %correlation_id, "reply for unknown or expired RPC"),
        }
    }

    /// Apply an unsolicited `pod:status:update`.
    ///
    /// Reports from superseded incarnations are discarded; terminal states
    /// are absorbing; only the connection bound to the pod's node may
    /// report.
    pub async fn handle_status_update(
        &self,
        conn_id: &ConnectionId,
        report: PodStatusReport,
    ) -> Result<(), HandlerError> {
        self.agent_identity(conn_id)?;
        let mut pod = self.store.get_pod(&report.pod_id).await?;

        let Some(node_id) = pod.node_id else {
            return Err(HandlerError::Validation(format!(
                "pod {} has no assigned node",
                pod.id
            )));
        };
        if !self.registry.is_bound_to(conn_id, &node_id) {
            return Err(HandlerError::Forbidden(format!(
                "connection is not bound to node {node_id}"
            )));
        }

        if report.incarnation < pod.incarnation {
            debug!(
                pod = %pod.id,
                reported = report.incarnation,
                current = pod.incarnation,
                "stale status update discarded"
            );
            return Ok(());
        }
        if pod.status.is_terminal() {
            debug!(pod = %pod.id, status = %pod.status, "status update after terminal state ignored");
            return Ok(());
        }

        let now_terminal = report.status.is_terminal();
        info!(
            pod = %pod.id,
            from = %pod.status,
            to = %report.status,
            reason = ?report.reason,
            "pod status update"
        );

        pod.status = report.status;
        pod.status_message = report.message;
        if now_terminal {
            pod.termination_reason = report.reason;
        }
        pod.updated_at_ms = self.clock.epoch_ms();
        self.store.update_pod(pod.clone()).await?;

        if now_terminal {
            self.release_pod_allocation(&pod).await;
            self.trigger_reconcile();
        }
        Ok(())
    }

    /// Drive a pod to `failed` with the given reason, returning its
    /// resources. No-op when the pod is already terminal.
    pub(crate) async fn fail_pod(&self, pod_id: &PodId, reason: TerminationReason, message: &str) {
        let mut pod = match self.store.get_pod(pod_id).await {
            Ok(pod) => pod,
            Err(e) => {
                warn!(pod = %pod_id, error = %e, "fail_pod: lookup failed");
                return;
            }
        };
        if pod.status.is_terminal() {
            return;
        }
        pod.status = PodStatus::Failed;
        pod.termination_reason = Some(reason);
        pod.status_message = Some(message.to_string());
        pod.updated_at_ms = self.clock.epoch_ms();
        if let Err(e) = self.store.update_pod(pod.clone()).await {
            warn!(pod = %pod_id, error = %e, "fail_pod: update failed");
            return;
        }
        self.release_pod_allocation(&pod).await;
        self.trigger_reconcile();
    }

    /// Return a terminated pod's requests to its node, in the store and in
    /// the scheduler's view. The store stays authoritative: the view is
    /// rebuilt from it on the next reconcile tick regardless.
    pub(crate) async fn release_pod_allocation(&self, pod: &Pod) {
        let Some(node_id) = pod.node_id else {
            return;
        };
        if pod.resource_requests.is_zero() {
            return;
        }
        self.scheduler.release(&node_id, &pod.resource_requests);
        match self.store.get_node(&node_id).await {
            Ok(mut node) => {
                node.allocated = node.allocated.saturating_sub(&pod.resource_requests);
                if let Err(e) = self.store.update_node(node).await {
                    warn!(node = %node_id, error = %e, "allocation release failed");
                }
            }
            Err(e) => debug!(node = %node_id, error = %e, "allocation release: node gone"),
        }
    }

    /// Expire in-flight RPCs past their deadline. Timed-out deploys fail
    /// the pod (unless a status update already advanced it); timed-out
    /// stops are left to the reconciler.
    pub(crate) async fn expire_rpcs(&self) {
        let now = self.clock.epoch_ms();
        let expired: Vec<(CorrelationId, InFlightRpc)> = {
            let mut rpcs = self.rpcs.lock();
            let dead: Vec<CorrelationId> = rpcs
                .iter()
                .filter(|(_, rpc)| now > rpc.deadline_ms)
                .map(|(id, _)| *id)
                .collect();
            dead.into_iter()
                .filter_map(|id| rpcs.remove(&id).map(|rpc| (id, rpc)))
                .collect()
        };

        for (correlation_id, rpc) in expired {
            warn!(
                correlation = %correlation_id,
                pod = %rpc.pod_id,
                node = %rpc.node_id,
                kind = ?rpc.kind,
                "RPC deadline passed"
            );
            if rpc.kind == RpcKind::Deploy {
                if let Ok(pod) = self.store.get_pod(&rpc.pod_id).await {
                    if pod.status == PodStatus::Scheduled {
                        self.fail_pod(&rpc.pod_id, TerminationReason::DeployFailed, "deploy timed out")
                            .await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
