// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment reconciler: drive actual pod counts toward desired state.
//!
//! A single-flight loop runs every `reconcile_interval`; calls to
//! `trigger_reconcile` during a pass coalesce into at most one follow-up
//! cycle. Per deployment and per tick: follow-latest version adoption,
//! rolling updates, crash-loop accounting with auto-rollback, replica or
//! daemonset scaling, then a scheduling pass that places pending pods and
//! dispatches `pod:deploy`.
//!
//! No lock is held across a store call; everything the reconciler caches
//! in memory is rebuilt from the store at the start of the tick.

use convoy_core::{
    Clock, Deployment, DeploymentState, Node, NodeId, Pack, Pod, PodId, PodStatus,
    TerminationReason,
};
use convoy_store::Store;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ctx::ServerCtx;
use crate::error::HandlerError;
use crate::scheduler::PodConstraints;

/// Result of crash-loop accounting for one deployment.
enum CrashLoopOutcome {
    Clean,
    RolledBack,
    Paused,
}

/// Run the reconcile loop until shutdown.
pub async fn run_reconciler<C: Clock>(ctx: Arc<ServerCtx<C>>) {
    let cancel = ctx.shutdown_token();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.reconcile_interval) => {}
            _ = ctx.reconcile_notify.notified() => {}
            _ = cancel.cancelled() => break,
        }
        if cancel.is_cancelled() {
            break;
        }
        ctx.take_reconcile_pending();
        ctx.reconcile_tick().await;
        // Triggers that arrived mid-pass coalesce into one follow-up.
        if ctx.take_reconcile_pending() {
            ctx.reconcile_tick().await;
        }
    }
}

impl<C: Clock> ServerCtx<C> {
    /// One full reconcile pass over every active deployment.
    pub async fn reconcile_tick(&self) {
        let nodes = match self.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "reconcile: listing nodes failed");
                return;
            }
        };
        self.scheduler.sync(&nodes);

        let deployments = match self.store.list_active_deployments().await {
            Ok(deployments) => deployments,
            Err(e) => {
                warn!(error = %e, "reconcile: listing deployments failed");
                return;
            }
        };

        for deployment in deployments {
            let id = deployment.id;
            if let Err(e) = self.reconcile_deployment(deployment, &nodes).await {
                warn!(deployment = %id, error = %e, "reconcile pass failed for deployment");
            }
        }
    }

    async fn reconcile_deployment(
        &self,
        mut dep: Deployment,
        nodes: &[Node],
    ) -> Result<(), HandlerError> {
        let now = self.clock.epoch_ms();

        self.adopt_latest_version(&mut dep, now).await?;

        let mut pods = self.store.list_pods_by_deployment(&dep.id).await?;
        self.mark_rolling_update(&dep, &mut pods, now).await;

        match self.account_failures(&mut dep, &pods, now) {
            CrashLoopOutcome::Paused => {
                dep.updated_at_ms = now;
                self.store.update_deployment(dep).await?;
                return Ok(());
            }
            CrashLoopOutcome::RolledBack => {
                // Stop survivors of the version that just failed.
                self.mark_rolling_update(&dep, &mut pods, now).await;
            }
            CrashLoopOutcome::Clean => {}
        }

        let pack = match self.store.get_pack(&dep.pack_id, &dep.pack_version).await {
            Ok(pack) => Some(pack),
            Err(e) => {
                warn!(deployment = %dep.name, version = %dep.pack_version, error = %e, "pack unavailable");
                None
            }
        };

        if let Some(ref pack) = pack {
            if dep.is_daemonset() {
                self.reconcile_daemonset(&dep, &pods, pack, nodes, now).await?;
            } else {
                self.scale_replicas(&dep, &pods, now).await?;
            }
            self.place_pending_pods(&dep, pack, nodes, now).await?;
        }

        // Counters reflect the store after this pass's writes.
        let final_pods = self.store.list_pods_by_deployment(&dep.id).await?;
        dep.ready_replicas = count_with(&final_pods, |s| s == PodStatus::Running);
        dep.available_replicas = count_with(&final_pods, |s| {
            matches!(s, PodStatus::Running | PodStatus::Starting | PodStatus::Scheduled)
        });
        dep.total_replicas = count_with(&final_pods, |s| s.is_active());
        dep.updated_at_ms = now;
        self.store.update_deployment(dep).await?;
        Ok(())
    }

    /// Follow-latest: adopt the pack's newest published version unless that
    /// exact version is in failure backoff.
    async fn adopt_latest_version(
        &self,
        dep: &mut Deployment,
        now: u64,
    ) -> Result<(), HandlerError> {
        if !dep.follow_latest {
            return Ok(());
        }
        let Some(latest) = self.store.latest_pack_version(&dep.pack_id).await? else {
            return Ok(());
        };
        if latest <= dep.pack_version {
            return Ok(());
        }
        if dep.in_failure_backoff(&latest, now) {
            debug!(deployment = %dep.name, version = %latest, "latest version in failure backoff, not adopting");
            return Ok(());
        }

        let pods = self.store.list_pods_by_deployment(&dep.id).await?;
        let old_is_healthy = pods
            .iter()
            .any(|p| p.status == PodStatus::Running && p.pack_version == dep.pack_version);
        if old_is_healthy {
            dep.last_successful_version = Some(dep.pack_version.clone());
        }

        info!(
            deployment = %dep.name,
            from = %dep.pack_version,
            to = %latest,
            "following latest pack version"
        );
        dep.pack_version = latest;
        Ok(())
    }

    /// Stop every non-terminal pod running a version other than the
    /// deployment's current one.
    async fn mark_rolling_update(&self, dep: &Deployment, pods: &mut [Pod], now: u64) {
        for pod in pods.iter_mut() {
            if pod.status.is_terminal()
                || pod.status == PodStatus::Stopping
                || pod.pack_version == dep.pack_version
            {
                continue;
            }
            let message = format!("Rolling update to version {}", dep.pack_version);
            self.retire_pod(pod, TerminationReason::RollingUpdate, &message, now).await;
        }
    }

    /// Transition one pod out of service: pending pods stop in place,
    /// placed pods get `stopping` plus a `pod:stop` dispatch.
    async fn retire_pod(
        &self,
        pod: &mut Pod,
        reason: TerminationReason,
        message: &str,
        now: u64,
    ) {
        if pod.node_id.is_none() {
            pod.status = PodStatus::Stopped;
            pod.termination_reason = Some(reason);
        } else {
            pod.status = PodStatus::Stopping;
        }
        pod.status_message = Some(message.to_string());
        pod.updated_at_ms = now;
        if let Err(e) = self.store.update_pod(pod.clone()).await {
            warn!(pod = %pod.id, error = %e, "failed to retire pod");
            return;
        }
        if pod.status == PodStatus::Stopping {
            self.dispatch_stop(pod, reason, Some(message.to_string())).await;
        }
    }

    /// Crash-loop accounting. Failures are counted once through a
    /// per-deployment watermark over pod `updated_at` stamps.
    fn account_failures(
        &self,
        dep: &mut Deployment,
        pods: &[Pod],
        now: u64,
    ) -> CrashLoopOutcome {
        let window_ms = self.config.failure_detection_window.as_millis() as u64;
        let cursor = self.failure_cursor.lock().get(&dep.id).copied().unwrap_or(0);

        let recent: Vec<&Pod> = pods
            .iter()
            .filter(|p| {
                p.pack_version == dep.pack_version
                    && p.updated_at_ms > cursor
                    && p.is_recent_app_failure(now, window_ms)
            })
            .collect();
        let recent_failures = recent.len() as u32;
        if let Some(newest) = recent.iter().map(|p| p.updated_at_ms).max() {
            self.failure_cursor.lock().insert(dep.id, newest);
        }

        let running_on_current = pods
            .iter()
            .any(|p| p.status == PodStatus::Running && p.pack_version == dep.pack_version);
        let any_running = pods.iter().any(|p| p.status == PodStatus::Running);

        if running_on_current && dep.consecutive_failures > 0 {
            info!(deployment = %dep.name, "pod healthy on current version, clearing failure state");
            dep.clear_failure_state();
            return CrashLoopOutcome::Clean;
        }

        if recent_failures == 0 || any_running {
            return CrashLoopOutcome::Clean;
        }

        let new_count = dep.consecutive_failures + recent_failures;
        if new_count < self.config.max_consecutive_failures {
            debug!(deployment = %dep.name, failures = new_count, "recording consecutive failures");
            dep.consecutive_failures = new_count;
            return CrashLoopOutcome::Clean;
        }

        let backoff = self.backoff_ms(new_count);
        match dep.last_successful_version.clone() {
            Some(last) if last != dep.pack_version => {
                let failed = std::mem::replace(&mut dep.pack_version, last);
                warn!(
                    deployment = %dep.name,
                    failed = %failed,
                    rollback = %dep.pack_version,
                    failures = new_count,
                    "crash loop detected, rolling back"
                );
                dep.consecutive_failures = 0;
                dep.failed_version = Some(failed);
                dep.failure_backoff_until_ms = Some(now + backoff);
                CrashLoopOutcome::RolledBack
            }
            _ => {
                warn!(
                    deployment = %dep.name,
                    failures = new_count,
                    "crash loop with no rollback target, pausing deployment"
                );
                dep.status = DeploymentState::Paused;
                dep.consecutive_failures = new_count;
                dep.failed_version = Some(dep.pack_version.clone());
                dep.failure_backoff_until_ms = Some(now + backoff);
                CrashLoopOutcome::Paused
            }
        }
    }

    /// Exponential backoff measured from the failure threshold: the first
    /// trip waits `initial_backoff`, each further accumulated failure
    /// doubles it, capped at `max_backoff`.
    fn backoff_ms(&self, failure_count: u32) -> u64 {
        let initial = self.config.initial_backoff.as_millis() as u64;
        let max = self.config.max_backoff.as_millis() as u64;
        let exponent = failure_count
            .saturating_sub(self.config.max_consecutive_failures)
            .min(20);
        initial.saturating_mul(1u64 << exponent).min(max)
    }

    /// Replica mode: create the shortfall as pending pods, retire the
    /// excess (newest incarnations first, skipping pods already stopping).
    async fn scale_replicas(
        &self,
        dep: &Deployment,
        pods: &[Pod],
        now: u64,
    ) -> Result<(), HandlerError> {
        let active: Vec<&Pod> = pods.iter().filter(|p| p.status.is_active()).collect();
        let desired = dep.replicas as usize;

        if active.len() < desired {
            let shortfall = desired - active.len();
            info!(deployment = %dep.name, shortfall, version = %dep.pack_version, "scaling up");
            for _ in 0..shortfall {
                let incarnation = self.store.next_incarnation(&dep.id).await?;
                let pod = pod_from_template(dep, incarnation, now, None, PodStatus::Pending);
                self.store.insert_pod(pod).await?;
            }
            return Ok(());
        }

        if active.len() > desired {
            let already_stopping =
                active.iter().filter(|p| p.status == PodStatus::Stopping).count();
            let to_stop = (active.len() - desired).saturating_sub(already_stopping);
            if to_stop == 0 {
                return Ok(());
            }
            info!(deployment = %dep.name, excess = to_stop, "scaling down");
            let mut candidates: Vec<Pod> = active
                .iter()
                .filter(|p| p.status != PodStatus::Stopping)
                .map(|p| (*p).clone())
                .collect();
            candidates.sort_by(|a, b| b.incarnation.cmp(&a.incarnation));
            for mut pod in candidates.into_iter().take(to_stop) {
                self.retire_pod(&mut pod, TerminationReason::ScaleDown, "Scaling down", now)
                    .await;
            }
        }
        Ok(())
    }

    /// Daemonset mode: one pod per eligible node (scheduler filters minus
    /// resource fit), pre-pinned and dispatched immediately.
    async fn reconcile_daemonset(
        &self,
        dep: &Deployment,
        pods: &[Pod],
        pack: &Pack,
        nodes: &[Node],
        now: u64,
    ) -> Result<(), HandlerError> {
        let constraints = PodConstraints {
            selector: dep.scheduling.node_selector.as_ref(),
            tolerations: &dep.tolerations,
        };
        let (eligible, _) = self.scheduler.eligible_nodes(constraints, pack, nodes);

        let covered: HashSet<NodeId> = pods
            .iter()
            .filter(|p| p.status.is_active())
            .filter_map(|p| p.node_id)
            .collect();

        for node in eligible {
            if covered.contains(&node.id) {
                continue;
            }
            let incarnation = self.store.next_incarnation(&dep.id).await?;
            let pod = pod_from_template(dep, incarnation, now, Some(node.id), PodStatus::Scheduled);
            info!(
                deployment = %dep.name,
                node = %node.name,
                pod = %pod.id,
                "daemonset pod pinned to node"
            );
            self.store.insert_pod(pod.clone()).await?;
            self.scheduler.reserve(&node.id, &pod.resource_requests);
            self.commit_allocation(&node.id, &pod).await;
            self.dispatch_deploy(&pod, pack).await;
        }
        Ok(())
    }

    /// Scheduling pass: place this deployment's pending pods and dispatch
    /// `pod:deploy` for each successful placement. The deploy is sent only
    /// after the pod is `scheduled` in the store.
    async fn place_pending_pods(
        &self,
        dep: &Deployment,
        pack: &Pack,
        nodes: &[Node],
        now: u64,
    ) -> Result<(), HandlerError> {
        let pods = self.store.list_pods_by_deployment(&dep.id).await?;
        for mut pod in pods.into_iter().filter(|p| p.status == PodStatus::Pending) {
            match self.scheduler.select(&pod, pack, nodes) {
                Ok(node_id) => {
                    pod.status = PodStatus::Scheduled;
                    pod.node_id = Some(node_id);
                    pod.status_message = None;
                    pod.updated_at_ms = now;
                    if let Err(e) = self.store.update_pod(pod.clone()).await {
                        warn!(pod = %pod.id, error = %e, "failed to persist placement, releasing");
                        self.scheduler.release(&node_id, &pod.resource_requests);
                        continue;
                    }
                    self.commit_allocation(&node_id, &pod).await;
                    self.dispatch_deploy(&pod, pack).await;
                }
                Err(failure) => {
                    warn!(
                        deployment = %dep.name,
                        pod = %pod.id,
                        constraints = ?failure.unmet_constraints,
                        runtime_tag = %failure.pack_runtime_tag,
                        "no compatible nodes, pod stays pending"
                    );
                    let note = serde_json::to_string(&failure.unmet_constraints)
                        .unwrap_or_else(|_| "unavailable".to_string());
                    pod.status_message = Some(format!("NO_COMPATIBLE_NODES: {note}"));
                    pod.updated_at_ms = now;
                    if let Err(e) = self.store.update_pod(pod).await {
                        warn!(error = %e, "failed to record scheduling refusal");
                    }
                }
            }
        }
        Ok(())
    }

    /// Persist a placement's resource reservation on the node record. The
    /// scheduler's in-memory view was already charged (by `select` or an
    /// explicit `reserve`).
    async fn commit_allocation(&self, node_id: &NodeId, pod: &Pod) {
        if pod.resource_requests.is_zero() {
            return;
        }
        match self.store.get_node(node_id).await {
            Ok(mut node) => {
                // Clamped so a pre-assigned daemonset pod cannot push the
                // record past allocatable.
                node.allocated = node
                    .allocated
                    .saturating_add(&pod.resource_requests)
                    .clamped_to(&node.allocatable);
                if let Err(e) = self.store.update_node(node).await {
                    warn!(node = %node_id, error = %e, "failed to persist allocation");
                }
            }
            Err(e) => warn!(node = %node_id, error = %e, "allocation commit: node lookup failed"),
        }
    }
}

fn count_with(pods: &[Pod], pred: impl Fn(PodStatus) -> bool) -> u32 {
    pods.iter().filter(|p| pred(p.status)).count() as u32
}

fn pod_from_template(
    dep: &Deployment,
    incarnation: u64,
    now: u64,
    node_id: Option<NodeId>,
    status: PodStatus,
) -> Pod {
    Pod {
        id: PodId::new(),
        pack_id: dep.pack_id,
        pack_version: dep.pack_version.clone(),
        deployment_id: Some(dep.id),
        incarnation,
        namespace: dep.namespace.clone(),
        status,
        node_id,
        resource_requests: dep.resource_requests,
        resource_limits: dep.resource_limits,
        labels: dep.pod_labels.clone(),
        annotations: dep.pod_annotations.clone(),
        tolerations: dep.tolerations.clone(),
        scheduling: dep.scheduling.clone(),
        termination_reason: None,
        status_message: None,
        created_at_ms: now,
        updated_at_ms: now,
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
