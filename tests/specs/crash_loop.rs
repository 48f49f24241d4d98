// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-loop specs: detection, rollback, pause, recovery.

use super::helpers::*;
use convoy_core::{Clock, DeploymentState, PackId, PodStatus, RuntimeTag, TerminationReason};
use convoy_store::Store;
use convoy_wire::{PodStatusReport, ServerMessage};
use std::time::Duration;

fn version(s: &str) -> semver::Version {
    semver::Version::parse(s).unwrap()
}

/// Three consecutive app crashes at 2.0.0 roll the deployment back to the
/// recorded last-successful 1.0.0 with a 60 s backoff on the bad version.
#[tokio::test]
async fn crash_loop_rolls_back_and_replaces_pods() {
    let c = cluster();
    let mut agent = attach_bound(&c);
    let node = register(&c, &agent, "worker-1").await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    c.store.put_pack(pack(pack_id, "2.0.0", RuntimeTag::Universal)).await.unwrap();

    let mut dep = deployment(pack_id, "2.0.0", 1);
    dep.last_successful_version = Some(version("1.0.0"));
    c.store.insert_deployment(dep.clone()).await.unwrap();

    // Let the reconciler place and dispatch a pod, then have the agent
    // report an app crash. Repeat until three failures accumulated.
    for round in 1..=3u64 {
        c.ctx.reconcile_tick().await;
        let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
        let live = pods
            .iter()
            .find(|p| p.status == PodStatus::Scheduled)
            .unwrap_or_else(|| panic!("round {round}: no scheduled pod"));
        c.ctx
            .handle_status_update(
                &agent.conn_id,
                PodStatusReport {
                    pod_id: live.id,
                    status: PodStatus::Failed,
                    message: Some("panic in handler".to_string()),
                    reason: Some(TerminationReason::AppCrashed),
                    incarnation: live.incarnation,
                },
            )
            .await
            .unwrap();
        // Distinct timestamps per failure, all inside the 60 s window.
        c.clock.advance(Duration::from_secs(5));
    }

    let before_rollback = c.clock.epoch_ms();
    c.ctx.reconcile_tick().await;

    let stored = c.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.pack_version, version("1.0.0"));
    assert_eq!(stored.failed_version, Some(version("2.0.0")));
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.failure_backoff_until_ms, Some(before_rollback + 60_000));
    assert_eq!(stored.status, DeploymentState::Active);

    // A replacement pod at 1.0.0 went out to the node.
    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let live: Vec<_> = pods.iter().filter(|p| p.status.is_active()).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].pack_version, version("1.0.0"));
    assert_eq!(live[0].node_id, Some(node.id));

    let frames = drain(&mut agent);
    assert!(frames.iter().any(|f| matches!(
        &f.msg,
        ServerMessage::PodDeploy(a) if a.pod_id == live[0].id
    )));
}

#[tokio::test]
async fn infrastructure_failures_never_trip_the_loop() {
    let c = cluster();
    let agent = attach_bound(&c);
    register(&c, &agent, "worker-1").await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    let dep = deployment(pack_id, "1.0.0", 1);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    for _ in 0..4 {
        c.ctx.reconcile_tick().await;
        let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
        if let Some(live) = pods.iter().find(|p| p.status == PodStatus::Scheduled) {
            c.ctx
                .handle_status_update(
                    &agent.conn_id,
                    PodStatusReport {
                        pod_id: live.id,
                        status: PodStatus::Failed,
                        message: None,
                        reason: Some(TerminationReason::NodeLost),
                        incarnation: live.incarnation,
                    },
                )
                .await
                .unwrap();
        }
    }

    let stored = c.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.status, DeploymentState::Active);
}

#[tokio::test]
async fn recovery_on_current_version_clears_the_tally() {
    let c = cluster();
    let agent = attach_bound(&c);
    register(&c, &agent, "worker-1").await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    let dep = deployment(pack_id, "1.0.0", 1);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    // One crash, then the replacement comes up healthy.
    c.ctx.reconcile_tick().await;
    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let first = pods.iter().find(|p| p.status == PodStatus::Scheduled).unwrap();
    c.ctx
        .handle_status_update(
            &agent.conn_id,
            PodStatusReport {
                pod_id: first.id,
                status: PodStatus::Failed,
                message: None,
                reason: Some(TerminationReason::AppCrashed),
                incarnation: first.incarnation,
            },
        )
        .await
        .unwrap();

    c.ctx.reconcile_tick().await;
    assert_eq!(
        c.store.get_deployment(&dep.id).await.unwrap().consecutive_failures,
        1
    );

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let second = pods.iter().find(|p| p.status == PodStatus::Scheduled).unwrap();
    for status in [PodStatus::Starting, PodStatus::Running] {
        c.ctx
            .handle_status_update(
                &agent.conn_id,
                PodStatusReport {
                    pod_id: second.id,
                    status,
                    message: None,
                    reason: None,
                    incarnation: second.incarnation,
                },
            )
            .await
            .unwrap();
    }

    c.ctx.reconcile_tick().await;
    let stored = c.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(stored.failed_version, None);
    assert_eq!(stored.last_successful_version, Some(version("1.0.0")));
    assert_eq!(stored.ready_replicas, 1);
}

#[tokio::test]
async fn pause_without_rollback_target_and_backoff_window() {
    let c = cluster();
    let agent = attach_bound(&c);
    register(&c, &agent, "worker-1").await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "2.0.0", RuntimeTag::Universal)).await.unwrap();
    let dep = deployment(pack_id, "2.0.0", 1);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    for _ in 1..=3 {
        c.ctx.reconcile_tick().await;
        let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
        if let Some(live) = pods.iter().find(|p| p.status == PodStatus::Scheduled) {
            c.ctx
                .handle_status_update(
                    &agent.conn_id,
                    PodStatusReport {
                        pod_id: live.id,
                        status: PodStatus::Failed,
                        message: None,
                        reason: Some(TerminationReason::OomKilled),
                        incarnation: live.incarnation,
                    },
                )
                .await
                .unwrap();
        }
        // Failures land in separate ticks but inside the 60 s window.
        c.clock.advance(Duration::from_secs(10));
    }

    let now = c.clock.epoch_ms();
    c.ctx.reconcile_tick().await;

    let stored = c.store.get_deployment(&dep.id).await.unwrap();
    assert_eq!(stored.status, DeploymentState::Paused);
    assert_eq!(stored.failed_version, Some(version("2.0.0")));
    assert_eq!(stored.failure_backoff_until_ms, Some(now + 60_000));
}
