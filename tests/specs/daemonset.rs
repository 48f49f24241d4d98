// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemonset specs: one pod per eligible node, pre-pinned dispatch.

use super::helpers::*;
use convoy_core::{LabelSelector, PackId, PodStatus, RuntimeTag};
use convoy_store::Store;

/// Two prod nodes covered; a third prod node registers and the next tick
/// creates a pod pre-assigned to it and dispatches to its connection.
#[tokio::test]
async fn new_prod_node_gets_a_daemonset_pod() {
    let c = cluster();
    let mut agent = attach_bound(&c);
    register_with(&c, &agent, registration("prod-1", labels(&[("env", "prod")]), vec![])).await;
    register_with(&c, &agent, registration("prod-2", labels(&[("env", "prod")]), vec![])).await;
    // An off-selector node never receives daemonset pods.
    register_with(&c, &agent, registration("dev-1", labels(&[("env", "dev")]), vec![])).await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    let mut dep = deployment(pack_id, "1.0.0", 0);
    dep.scheduling.node_selector = Some(LabelSelector::from_labels(labels(&[("env", "prod")])));
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;
    assert_eq!(c.store.list_pods_by_deployment(&dep.id).await.unwrap().len(), 2);
    drain(&mut agent);

    let n3 =
        register_with(&c, &agent, registration("prod-3", labels(&[("env", "prod")]), vec![]))
            .await;
    c.ctx.reconcile_tick().await;

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 3);
    let pinned = pods.iter().find(|p| p.node_id == Some(n3.id)).unwrap();
    // Pre-assigned: the pod skips the scheduler and is born scheduled.
    assert_eq!(pinned.status, PodStatus::Scheduled);

    let frames = drain(&mut agent);
    assert_eq!(deploys_for(&frames, n3.id), 1);
}

#[tokio::test]
async fn daemonset_ignores_resource_pressure() {
    let c = cluster();
    let agent = attach_bound(&c);
    let mut reg = registration("tiny", labels(&[]), vec![]);
    // No free capacity at all.
    reg.allocatable = convoy_core::Resources::ZERO;
    let node = register_with(&c, &agent, reg).await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    let dep = deployment(pack_id, "1.0.0", 0);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].node_id, Some(node.id));
}

#[tokio::test]
async fn replaced_daemonset_pod_is_recreated() {
    let c = cluster();
    let agent = attach_bound(&c);
    let node = register(&c, &agent, "prod-1").await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    let dep = deployment(pack_id, "1.0.0", 0);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;
    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 1);
    let first = pods[0].clone();

    // The pod dies; the node stays eligible, so the next tick re-covers it
    // with a fresh incarnation.
    c.ctx
        .handle_status_update(
            &agent.conn_id,
            convoy_wire::PodStatusReport {
                pod_id: first.id,
                status: PodStatus::Failed,
                message: None,
                reason: Some(convoy_core::TerminationReason::AppCrashed),
                incarnation: first.incarnation,
            },
        )
        .await
        .unwrap();

    c.ctx.reconcile_tick().await;
    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let live: Vec<_> = pods.iter().filter(|p| p.status.is_active()).collect();
    assert_eq!(live.len(), 1);
    assert!(live[0].incarnation > first.incarnation);
    assert_eq!(live[0].node_id, Some(node.id));
}
