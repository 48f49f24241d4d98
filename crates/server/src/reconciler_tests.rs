// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciler tests: scaling, rolling updates, crash loops, daemonsets.

use super::*;
use crate::test_helpers::{
    connect, deployment_fixture, failed_pod, pack_fixture, pod_fixture, register_node, setup,
    TestContext,
};
use convoy_core::PackId;
use convoy_wire::ServerMessage;
use std::time::Duration;

async fn seed_pack(t: &TestContext, id: PackId, version: &str) {
    t.store.put_pack(pack_fixture(id, version)).await.unwrap();
}

fn version(s: &str) -> semver::Version {
    semver::Version::parse(s).unwrap()
}

#[tokio::test]
async fn scale_up_creates_pending_pods_with_fresh_incarnations() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 3);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    t.ctx.reconcile_tick().await;

    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 3);
    let mut incarnations: Vec<u64> = pods.iter().map(|p| p.incarnation).collect();
    incarnations.sort_unstable();
    assert_eq!(incarnations, vec![1, 2, 3]);
    for pod in &pods {
        // No nodes online: pods stay pending with a structured refusal note.
        assert_eq!(pod.status, PodStatus::Pending);
        assert!(pod
            .status_message
            .as_deref()
            .unwrap_or_default()
            .starts_with("NO_COMPATIBLE_NODES"));
        assert_eq!(pod.pack_version, version("1.0.0"));
    }
}

#[tokio::test]
async fn pending_pods_are_placed_and_deploy_dispatched() {
    let t = setup();
    let (conn, mut rx) = connect(&t);
    let node = register_node(&t, &conn, "worker-1").await;

    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 1);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    t.ctx.reconcile_tick().await;

    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].status, PodStatus::Scheduled);
    assert_eq!(pods[0].node_id, Some(node.id));

    // Allocation persisted on the node.
    let stored = t.store.get_node(&node.id).await.unwrap();
    assert_eq!(stored.allocated, dep.resource_requests);

    // pod:deploy went out after the store transition.
    let frames = crate::test_helpers::drain(&mut rx);
    assert!(frames.iter().any(|f| matches!(&f.msg, ServerMessage::PodDeploy(a) if a.pod_id == pods[0].id)));

    // Counters reflect the placement.
    let dep = t.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(dep.available_replicas, 1);
    assert_eq!(dep.total_replicas, 1);
    assert_eq!(dep.ready_replicas, 0);
}

#[tokio::test]
async fn scale_down_retires_newest_first_and_skips_stopping() {
    let t = setup();
    let (conn, mut rx) = connect(&t);
    let node = register_node(&t, &conn, "worker-1").await;

    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 1);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    // Three active pods on the node, one already stopping.
    for (incarnation, status) in [
        (1, PodStatus::Running),
        (2, PodStatus::Running),
        (3, PodStatus::Stopping),
    ] {
        let mut pod = pod_fixture(&dep, incarnation, status);
        pod.node_id = Some(node.id);
        t.store.insert_pod(pod).await.unwrap();
    }

    t.ctx.reconcile_tick().await;

    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let by_incarnation = |n: u64| pods.iter().find(|p| p.incarnation == n).unwrap().clone();

    // Excess = 2, one already stopping: only the newest running pod retires.
    assert_eq!(by_incarnation(1).status, PodStatus::Running);
    assert_eq!(by_incarnation(2).status, PodStatus::Stopping);
    assert_eq!(by_incarnation(3).status, PodStatus::Stopping);

    let frames = crate::test_helpers::drain(&mut rx);
    let stops: Vec<_> = frames
        .iter()
        .filter(|f| matches!(&f.msg, ServerMessage::PodStop { .. }))
        .collect();
    assert_eq!(stops.len(), 1);
    match &stops[0].msg {
        ServerMessage::PodStop { pod_id, reason, .. } => {
            assert_eq!(*pod_id, by_incarnation(2).id);
            assert_eq!(*reason, TerminationReason::ScaleDown);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn rolling_update_stops_pods_on_other_versions() {
    let t = setup();
    let (conn, mut rx) = connect(&t);
    let node = register_node(&t, &conn, "worker-1").await;

    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    seed_pack(&t, pack_id, "2.0.0").await;
    let dep = deployment_fixture(pack_id, "2.0.0", 1);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    let mut old = pod_fixture(&dep, 1, PodStatus::Running);
    old.pack_version = version("1.0.0");
    old.node_id = Some(node.id);
    t.store.insert_pod(old.clone()).await.unwrap();

    t.ctx.reconcile_tick().await;

    let stored = t.store.get_pod(&old.id).await.unwrap();
    assert_eq!(stored.status, PodStatus::Stopping);
    assert_eq!(
        stored.status_message.as_deref(),
        Some("Rolling update to version 2.0.0")
    );

    let frames = crate::test_helpers::drain(&mut rx);
    assert!(frames.iter().any(|f| matches!(
        &f.msg,
        ServerMessage::PodStop { pod_id, reason, .. }
            if *pod_id == old.id && *reason == TerminationReason::RollingUpdate
    )));
}

#[tokio::test]
async fn crash_loop_rolls_back_to_last_successful_version() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    seed_pack(&t, pack_id, "2.0.0").await;

    let mut dep = deployment_fixture(pack_id, "2.0.0", 1);
    dep.last_successful_version = Some(version("1.0.0"));
    t.store.insert_deployment(dep.clone()).await.unwrap();

    // Three application failures on 2.0.0 inside the detection window.
    let now = t.clock.epoch_ms();
    for incarnation in 1..=3 {
        t.store.insert_pod(failed_pod(&dep, incarnation, now)).await.unwrap();
    }

    t.ctx.reconcile_tick().await;

    let stored = t.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.pack_version, version("1.0.0"));
    assert_eq!(stored.failed_version, Some(version("2.0.0")));
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.failure_backoff_until_ms, Some(now + 60_000));
    assert_eq!(stored.status, DeploymentState::Active);

    // Replacement pod exists at the rollback version.
    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let replacement: Vec<_> = pods
        .iter()
        .filter(|p| p.status.is_active())
        .collect();
    assert_eq!(replacement.len(), 1);
    assert_eq!(replacement[0].pack_version, version("1.0.0"));
}

#[tokio::test]
async fn crash_loop_without_rollback_target_pauses() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "2.0.0").await;
    let dep = deployment_fixture(pack_id, "2.0.0", 1);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    let now = t.clock.epoch_ms();
    for incarnation in 1..=3 {
        t.store.insert_pod(failed_pod(&dep, incarnation, now)).await.unwrap();
    }

    t.ctx.reconcile_tick().await;

    let stored = t.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.status, DeploymentState::Paused);
    assert_eq!(stored.failed_version, Some(version("2.0.0")));
    assert_eq!(stored.failure_backoff_until_ms, Some(now + 60_000));

    // Paused deployments are skipped: no replacement pods appear.
    t.ctx.reconcile_tick().await;
    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert!(pods.iter().all(|p| !p.status.is_active()));
}

#[tokio::test]
async fn failures_below_threshold_accumulate_once() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 1);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    t.store
        .insert_pod(failed_pod(&dep, 1, t.clock.epoch_ms()))
        .await
        .unwrap();

    t.ctx.reconcile_tick().await;
    assert_eq!(
        t.store.get_deployment(&dep.id).await.unwrap().consecutive_failures,
        1
    );

    // The same failed pod is not recounted on the next pass.
    t.ctx.reconcile_tick().await;
    assert_eq!(
        t.store.get_deployment(&dep.id).await.unwrap().consecutive_failures,
        1
    );
}

#[tokio::test]
async fn old_failures_outside_window_are_ignored() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 1);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    let stale = t.clock.epoch_ms();
    t.store.insert_pod(failed_pod(&dep, 1, stale)).await.unwrap();
    t.clock.advance(Duration::from_secs(120));

    t.ctx.reconcile_tick().await;
    assert_eq!(
        t.store.get_deployment(&dep.id).await.unwrap().consecutive_failures,
        0
    );
}

#[tokio::test]
async fn running_pod_on_current_version_clears_failure_state() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "2.0.0").await;
    let mut dep = deployment_fixture(pack_id, "2.0.0", 1);
    dep.consecutive_failures = 2;
    dep.failed_version = Some(version("1.5.0"));
    dep.failure_backoff_until_ms = Some(t.clock.epoch_ms() + 60_000);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    let mut healthy = pod_fixture(&dep, 3, PodStatus::Running);
    healthy.node_id = Some(convoy_core::NodeId::new());
    t.store.insert_pod(healthy).await.unwrap();

    t.ctx.reconcile_tick().await;

    let stored = t.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.failed_version, None);
    assert_eq!(stored.failure_backoff_until_ms, None);
    assert_eq!(stored.last_successful_version, Some(version("2.0.0")));
}

#[tokio::test]
async fn follow_latest_adopts_new_version_and_rolls() {
    let t = setup();
    let (conn, _rx) = connect(&t);
    let node = register_node(&t, &conn, "worker-1").await;

    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    seed_pack(&t, pack_id, "1.1.0").await;

    let mut dep = deployment_fixture(pack_id, "1.0.0", 1);
    dep.follow_latest = true;
    t.store.insert_deployment(dep.clone()).await.unwrap();

    let mut running = pod_fixture(&dep, 1, PodStatus::Running);
    running.node_id = Some(node.id);
    t.store.insert_pod(running.clone()).await.unwrap();

    t.ctx.reconcile_tick().await;

    let stored = t.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.pack_version, version("1.1.0"));
    // The old version had a ready pod, so it is recorded as last good.
    assert_eq!(stored.last_successful_version, Some(version("1.0.0")));
    assert_eq!(
        t.store.get_pod(&running.id).await.unwrap().status,
        PodStatus::Stopping
    );

    // Once the old pod reports stopped, the next tick replaces it.
    let mut stopped = t.store.get_pod(&running.id).await.unwrap();
    stopped.status = PodStatus::Stopped;
    stopped.termination_reason = Some(TerminationReason::RollingUpdate);
    t.store.update_pod(stopped).await.unwrap();

    t.ctx.reconcile_tick().await;
    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let fresh: Vec<_> = pods.iter().filter(|p| p.status.is_active()).collect();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].pack_version, version("1.1.0"));
}

#[tokio::test]
async fn follow_latest_respects_failure_backoff() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    seed_pack(&t, pack_id, "2.0.0").await;

    let mut dep = deployment_fixture(pack_id, "1.0.0", 0);
    dep.follow_latest = true;
    dep.failed_version = Some(version("2.0.0"));
    dep.failure_backoff_until_ms = Some(t.clock.epoch_ms() + 60_000);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    t.ctx.reconcile_tick().await;
    assert_eq!(
        t.store.get_deployment(&dep.id).await.unwrap().pack_version,
        version("1.0.0")
    );

    // Backoff elapsed: the failed version is retried.
    t.clock.advance(Duration::from_secs(61));
    t.ctx.reconcile_tick().await;
    assert_eq!(
        t.store.get_deployment(&dep.id).await.unwrap().pack_version,
        version("2.0.0")
    );
}

#[tokio::test]
async fn daemonset_covers_each_eligible_node_once() {
    let t = setup();
    let (conn, mut rx) = connect(&t);
    register_node(&t, &conn, "prod-1").await;
    register_node(&t, &conn, "prod-2").await;

    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 0);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    t.ctx.reconcile_tick().await;

    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 2);
    for pod in &pods {
        assert_eq!(pod.status, PodStatus::Scheduled);
        assert!(pod.node_id.is_some());
    }
    let deploys = crate::test_helpers::drain(&mut rx)
        .into_iter()
        .filter(|f| matches!(f.msg, ServerMessage::PodDeploy(_)))
        .count();
    assert_eq!(deploys, 2);

    // Nodes already covered: a second tick adds nothing.
    t.ctx.reconcile_tick().await;
    assert_eq!(t.store.list_pods_by_deployment(&dep.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn daemonset_adds_pod_for_newly_registered_node() {
    let t = setup();
    let (conn, mut rx) = connect(&t);
    register_node(&t, &conn, "prod-1").await;
    register_node(&t, &conn, "prod-2").await;

    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 0);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    t.ctx.reconcile_tick().await;
    assert_eq!(t.store.list_pods_by_deployment(&dep.id).await.unwrap().len(), 2);
    crate::test_helpers::drain(&mut rx);

    // Third node joins the fleet.
    let n3 = register_node(&t, &conn, "prod-3").await;
    t.ctx.reconcile_tick().await;

    let pods = t.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods.len(), 3);
    let new_pod = pods.iter().find(|p| p.node_id == Some(n3.id)).unwrap();
    assert_eq!(new_pod.status, PodStatus::Scheduled);

    let frames = crate::test_helpers::drain(&mut rx);
    assert!(frames.iter().any(|f| matches!(
        &f.msg,
        ServerMessage::PodDeploy(a) if a.pod_id == new_pod.id && a.node_id == n3.id
    )));
}

#[tokio::test]
async fn replica_counters_track_statuses() {
    let t = setup();
    let pack_id = PackId::new();
    seed_pack(&t, pack_id, "1.0.0").await;
    let dep = deployment_fixture(pack_id, "1.0.0", 4);
    t.store.insert_deployment(dep.clone()).await.unwrap();

    let node_id = convoy_core::NodeId::new();
    for (incarnation, status) in [
        (1, PodStatus::Running),
        (2, PodStatus::Starting),
        (3, PodStatus::Scheduled),
        (4, PodStatus::Failed),
    ] {
        let mut pod = pod_fixture(&dep, incarnation, status);
        if status.requires_node() {
            pod.node_id = Some(node_id);
        }
        pod.termination_reason = (status == PodStatus::Failed)
            .then_some(TerminationReason::RollingUpdate);
        t.store.insert_pod(pod).await.unwrap();
    }

    t.ctx.reconcile_tick().await;

    let stored = t.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.ready_replicas, 1);
    assert_eq!(stored.available_replicas, 3);
    // Failed pod replaced by a fresh pending one: 3 survivors + 1 new.
    assert_eq!(stored.total_replicas, 4);
}
