// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling specs: taints, runtime gating, allocation invariants.

use super::helpers::*;
use convoy_core::{
    LabelSelector, PackId, PodStatus, RuntimeTag, Taint, TaintEffect, Toleration,
    TolerationOperator,
};
use convoy_store::Store;
use convoy_wire::ServerMessage;

fn gpu_taint() -> Taint {
    Taint {
        key: "gpu".to_string(),
        value: Some("a100".to_string()),
        effect: TaintEffect::NoSchedule,
    }
}

#[tokio::test]
async fn tainted_node_is_avoided_then_chosen_with_toleration() {
    // Node A tainted gpu=a100:NoSchedule, node B clean, both env=prod.
    let c = cluster();
    let agent = attach_bound(&c);
    let node_a = register_with(
        &c,
        &agent,
        registration("node-a", labels(&[("env", "prod")]), vec![gpu_taint()]),
    )
    .await;
    let node_b = register_with(
        &c,
        &agent,
        registration("node-b", labels(&[("env", "prod")]), Vec::new()),
    )
    .await;

    let pack_id = PackId::new();
    c.store
        .put_pack(pack(pack_id, "1.0.0", RuntimeTag::NodeOnly))
        .await
        .unwrap();
    let mut dep = deployment(pack_id, "1.0.0", 1);
    dep.scheduling.node_selector = Some(LabelSelector::from_labels(labels(&[("env", "prod")])));
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].status, PodStatus::Scheduled);
    assert_eq!(pods[0].node_id, Some(node_b.id), "untolerated taint must repel");

    // Same constraints plus a matching toleration, with only the tainted
    // node available: placement lands on node A.
    let c2 = cluster();
    let agent2 = attach_bound(&c2);
    let node_a2 = register_with(
        &c2,
        &agent2,
        registration("node-a", labels(&[("env", "prod")]), vec![gpu_taint()]),
    )
    .await;

    c2.store
        .put_pack(pack(pack_id, "1.0.0", RuntimeTag::NodeOnly))
        .await
        .unwrap();
    let mut dep2 = deployment(pack_id, "1.0.0", 1);
    dep2.scheduling.node_selector =
        Some(LabelSelector::from_labels(labels(&[("env", "prod")])));
    dep2.tolerations = vec![Toleration {
        key: Some("gpu".to_string()),
        operator: TolerationOperator::Equal,
        value: Some("a100".to_string()),
        effect: Some(TaintEffect::NoSchedule),
    }];
    c2.store.insert_deployment(dep2.clone()).await.unwrap();

    c2.ctx.reconcile_tick().await;

    let pods = c2.store.list_pods_by_deployment(&dep2.id).await.unwrap();
    assert_eq!(pods[0].node_id, Some(node_a2.id));
}

#[tokio::test]
async fn browser_only_pack_refuses_native_fleet() {
    let c = cluster();
    let agent = attach_bound(&c);
    register(&c, &agent, "native-1").await;

    let pack_id = PackId::new();
    c.store
        .put_pack(pack(pack_id, "1.0.0", RuntimeTag::BrowserOnly))
        .await
        .unwrap();
    let dep = deployment(pack_id, "1.0.0", 1);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].status, PodStatus::Pending);
    let note = pods[0].status_message.clone().unwrap_or_default();
    assert!(note.starts_with("NO_COMPATIBLE_NODES"), "got note {note:?}");

    // The refusal is structured: the scheduler names the required runtime.
    let failure = c
        .ctx
        .scheduler
        .select(
            &pods[0],
            &pack(pack_id, "1.0.0", RuntimeTag::BrowserOnly),
            &c.store.list_nodes().await.unwrap(),
        )
        .unwrap_err();
    assert_eq!(failure.required_runtime, Some(convoy_core::RuntimeType::Browser));
    assert_eq!(failure.unmet_constraints.runtime, 1);
}

#[tokio::test]
async fn allocation_never_exceeds_allocatable() {
    let c = cluster();
    let agent = attach_bound(&c);
    // Room for exactly 2 pods of the deployment's size (pods dimension).
    let mut reg = registration("small", labels(&[]), Vec::new());
    reg.allocatable = convoy_core::Resources::new(1000, 2048, 2, 2);
    let node = register_with(&c, &agent, reg).await;

    let pack_id = PackId::new();
    c.store
        .put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal))
        .await
        .unwrap();
    let dep = deployment(pack_id, "1.0.0", 5);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;

    let stored = c.store.get_node(&node.id).await.unwrap();
    assert!(stored.allocated.fits_within(&stored.allocatable));

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let placed = pods.iter().filter(|p| p.status == PodStatus::Scheduled).count();
    let pending = pods.iter().filter(|p| p.status == PodStatus::Pending).count();
    assert_eq!(placed, 2);
    assert_eq!(pending, 3);
}

#[tokio::test]
async fn deploy_frames_follow_store_placement() {
    let c = cluster();
    let mut agent = attach_bound(&c);
    let node = register(&c, &agent, "worker-1").await;

    let pack_id = PackId::new();
    c.store
        .put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal))
        .await
        .unwrap();
    let dep = deployment(pack_id, "1.0.0", 2);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;

    let frames = drain(&mut agent);
    assert_eq!(deploys_for(&frames, node.id), 2);
    for frame in frames {
        if let ServerMessage::PodDeploy(assignment) = frame.msg {
            let pod = c.store.get_pod(&assignment.pod_id).await.unwrap();
            assert_eq!(pod.status, PodStatus::Scheduled);
            assert_eq!(pod.node_id, Some(node.id));
            assert_eq!(assignment.incarnation, pod.incarnation);
        }
    }
}
