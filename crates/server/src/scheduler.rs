// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pod scheduler: pick an eligible online node for a pending pod.
//!
//! Filter order: node status + cordon, pack visibility for the node's
//! registering user, runtime tag, minimum runtime version, label selector,
//! hard taints vs tolerations, then resource fit. Refusals are structured
//! so the reconciler can log which filter emptied the candidate set.
//!
//! The scheduler keeps its own allocated-resource view: selection and the
//! allocation increment happen under one lock so two pods cannot both land
//! in the last slot of a node. The view is rebuilt from the store (the
//! authoritative source) at the start of every reconcile tick.

use convoy_core::{
    hard_untolerated, prefer_no_schedule_count, LabelSelector, Node, NodeId, Pack, Pod,
    Resources, RuntimeTag, RuntimeType, Toleration,
};
use convoy_wire::{ErrorCode, ErrorPayload};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;

/// Scheduling constraints, extracted from a pod or a deployment template.
#[derive(Clone, Copy)]
pub struct PodConstraints<'a> {
    pub selector: Option<&'a LabelSelector>,
    pub tolerations: &'a [Toleration],
}

impl<'a> PodConstraints<'a> {
    pub fn from_pod(pod: &'a Pod) -> Self {
        Self {
            selector: pod.scheduling.node_selector.as_ref(),
            tolerations: &pod.tolerations,
        }
    }
}

/// How many nodes each filter rejected. Counted against the first filter
/// that rejected the node, in evaluation order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmetConstraints {
    pub not_schedulable: u32,
    pub visibility: u32,
    pub runtime: u32,
    pub runtime_version: u32,
    pub selector: u32,
    pub taints: u32,
    pub resources: u32,
}

/// Structured scheduling refusal.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFailure {
    pub pack_runtime_tag: RuntimeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_runtime: Option<RuntimeType>,
    pub unmet_constraints: UnmetConstraints,
}

impl ScheduleFailure {
    fn new(pack: &Pack, unmet_constraints: UnmetConstraints) -> Self {
        Self {
            pack_runtime_tag: pack.runtime_tag,
            required_runtime: pack.runtime_tag.required_runtime(),
            unmet_constraints,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let details = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        ErrorPayload::with_details(
            ErrorCode::NoCompatibleNodes,
            "no compatible nodes for pod",
            details,
        )
    }
}

/// Node selection plus in-memory allocation accounting.
#[derive(Default)]
pub struct Scheduler {
    view: Mutex<HashMap<NodeId, Resources>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the allocation view from store-authoritative node records.
    pub fn sync(&self, nodes: &[Node]) {
        let mut view = self.view.lock();
        view.clear();
        for node in nodes {
            view.insert(node.id, node.allocated);
        }
    }

    /// Charge a pre-assigned placement (daemonset pods skip `select`).
    pub fn reserve(&self, node_id: &NodeId, requests: &Resources) {
        let mut view = self.view.lock();
        if let Some(allocated) = view.get_mut(node_id) {
            *allocated = allocated.saturating_add(requests);
        } else {
            view.insert(*node_id, *requests);
        }
    }

    /// Return allocation for a node after its pod terminated.
    pub fn release(&self, node_id: &NodeId, requests: &Resources) {
        let mut view = self.view.lock();
        if let Some(allocated) = view.get_mut(node_id) {
            *allocated = allocated.saturating_sub(requests);
        }
    }

    /// Nodes passing every filter except resource fit. Daemonset placement
    /// uses this directly since its pods are pre-assigned.
    pub fn eligible_nodes<'a>(
        &self,
        constraints: PodConstraints<'_>,
        pack: &Pack,
        nodes: &'a [Node],
    ) -> (Vec<&'a Node>, UnmetConstraints) {
        let mut unmet = UnmetConstraints::default();
        let mut eligible = Vec::new();

        for node in nodes {
            if !node.is_schedulable() {
                unmet.not_schedulable += 1;
                continue;
            }
            if !pack.accessible_by(&node.registered_by) {
                unmet.visibility += 1;
                continue;
            }
            if !pack.runtime_tag.allows(node.runtime_type) {
                unmet.runtime += 1;
                continue;
            }
            if !pack.runtime_version_ok(node.runtime_version().as_ref()) {
                unmet.runtime_version += 1;
                continue;
            }
            if let Some(selector) = constraints.selector {
                if !selector.matches(&node.labels) {
                    unmet.selector += 1;
                    continue;
                }
            }
            if !hard_untolerated(&node.taints, constraints.tolerations).is_empty() {
                unmet.taints += 1;
                continue;
            }
            eligible.push(node);
        }

        (eligible, unmet)
    }

    /// Select a node for a pending pod and reserve its resources.
    ///
    /// On success the pod's requests are already added to the in-memory
    /// view; the caller persists the `scheduled` transition and the node's
    /// allocated vector, or calls [`Scheduler::release`] if persisting
    /// fails.
    pub fn select(
        &self,
        pod: &Pod,
        pack: &Pack,
        nodes: &[Node],
    ) -> Result<NodeId, ScheduleFailure> {
        let (eligible, mut unmet) =
            self.eligible_nodes(PodConstraints::from_pod(pod), pack, nodes);
        if eligible.is_empty() {
            return Err(ScheduleFailure::new(pack, unmet));
        }

        // Resource fit, ranking, and the allocation increment share one
        // critical section with the view.
        let mut view = self.view.lock();

        let mut fitting: Vec<(&Node, Resources)> = Vec::new();
        for &node in &eligible {
            let allocated = view.get(&node.id).copied().unwrap_or(node.allocated);
            let free = node.allocatable.free(&allocated);
            if pod.resource_requests.fits_within(&free) {
                fitting.push((node, free));
            }
        }
        if fitting.is_empty() {
            unmet.resources = eligible.len() as u32;
            return Err(ScheduleFailure::new(pack, unmet));
        }

        // Fewest PreferNoSchedule taints, then largest minimum headroom.
        let best_key = fitting
            .iter()
            .map(|(node, free)| (prefer_no_schedule_count(&node.taints), Reverse(free.min_component())))
            .min()
            .unwrap_or((0, Reverse(0)));
        let best: Vec<&(&Node, Resources)> = fitting
            .iter()
            .filter(|(node, free)| {
                (prefer_no_schedule_count(&node.taints), Reverse(free.min_component())) == best_key
            })
            .collect();

        let chosen: &Node = match best.choose(&mut rand::thread_rng()) {
            Some(entry) => entry.0,
            None => return Err(ScheduleFailure::new(pack, unmet)),
        };

        let allocated = view.entry(chosen.id).or_insert(chosen.allocated);
        *allocated = allocated.saturating_add(&pod.resource_requests);
        Ok(chosen.id)
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
