// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incarnation specs: late reports from superseded pod instances.

use super::helpers::*;
use convoy_core::{PackId, PodStatus, RuntimeTag, TerminationReason};
use convoy_store::Store;
use convoy_wire::PodStatusReport;

/// A pod replaced at incarnation 4 ignores a leftover frame carrying
/// incarnation 3 but applies the current one.
#[tokio::test]
async fn late_report_from_old_incarnation_is_rejected() {
    let c = cluster();
    let agent = attach_bound(&c);
    register(&c, &agent, "worker-1").await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    let dep = deployment(pack_id, "1.0.0", 1);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    // Burn incarnations 1-3, then place the live pod at 4.
    for _ in 0..3 {
        c.store.next_incarnation(&dep.id).await.unwrap();
    }
    c.ctx.reconcile_tick().await;

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    let live = pods.iter().find(|p| p.status == PodStatus::Scheduled).unwrap();
    assert_eq!(live.incarnation, 4);

    // Mark it running, then replay a stale stop from incarnation 3.
    c.ctx
        .handle_status_update(
            &agent.conn_id,
            PodStatusReport {
                pod_id: live.id,
                status: PodStatus::Running,
                message: None,
                reason: None,
                incarnation: 4,
            },
        )
        .await
        .unwrap();
    c.ctx
        .handle_status_update(
            &agent.conn_id,
            PodStatusReport {
                pod_id: live.id,
                status: PodStatus::Stopped,
                message: Some("late frame".to_string()),
                reason: Some(TerminationReason::AppExitOk),
                incarnation: 3,
            },
        )
        .await
        .unwrap();
    assert_eq!(c.store.get_pod(&live.id).await.unwrap().status, PodStatus::Running);

    // The live incarnation's report applies normally.
    c.ctx
        .handle_status_update(
            &agent.conn_id,
            PodStatusReport {
                pod_id: live.id,
                status: PodStatus::Stopped,
                message: None,
                reason: Some(TerminationReason::AppExitOk),
                incarnation: 4,
            },
        )
        .await
        .unwrap();
    let stored = c.store.get_pod(&live.id).await.unwrap();
    assert_eq!(stored.status, PodStatus::Stopped);
    assert_eq!(stored.termination_reason, Some(TerminationReason::AppExitOk));
}

/// Incarnations are strictly increasing across consecutively created pods
/// of one deployment.
#[tokio::test]
async fn incarnations_increase_across_replacements() {
    let c = cluster();
    let agent = attach_bound(&c);
    register(&c, &agent, "worker-1").await;

    let pack_id = PackId::new();
    c.store.put_pack(pack(pack_id, "1.0.0", RuntimeTag::Universal)).await.unwrap();
    let dep = deployment(pack_id, "1.0.0", 1);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        c.ctx.reconcile_tick().await;
        let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
        let live = pods.iter().find(|p| p.status.is_active()).unwrap();
        seen.push(live.incarnation);
        c.ctx
            .handle_status_update(
                &agent.conn_id,
                PodStatusReport {
                    pod_id: live.id,
                    status: PodStatus::Stopped,
                    message: None,
                    reason: Some(TerminationReason::AppExitOk),
                    incarnation: live.incarnation,
                },
            )
            .await
            .unwrap();
    }

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "incarnations {seen:?}");
}
