// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node lifecycle specs driven through wire frames.

use super::helpers::*;
use convoy_core::{Clock, Labels, NodeStatus};
use convoy_store::Store;
use convoy_wire::{ClientFrame, ClientMessage, ErrorCode, HeartbeatPayload, ServerMessage};
use std::time::Duration;

async fn frame(c: &Cluster, agent: &AgentConn, msg: ClientMessage) {
    convoy_server::session::handle_frame(c.ctx.as_ref(), &agent.conn_id, ClientFrame::new(msg))
        .await;
}

fn heartbeat_msg(node_id: convoy_core::NodeId, status: Option<NodeStatus>) -> ClientMessage {
    ClientMessage::NodeHeartbeat(HeartbeatPayload {
        node_id,
        timestamp: 0,
        status,
        allocated: None,
        active_pods: None,
    })
}

#[tokio::test]
async fn duplicate_registration_conflicts_once() {
    let c = cluster();
    let mut agent = attach_agent(&c).await;

    frame(
        &c,
        &agent,
        ClientMessage::NodeRegister(registration("worker-1", Labels::new(), Vec::new())),
    )
    .await;
    frame(
        &c,
        &agent,
        ClientMessage::NodeRegister(registration("worker-1", Labels::new(), Vec::new())),
    )
    .await;

    let frames = drain(&mut agent);
    assert!(matches!(frames[0].msg, ServerMessage::NodeRegisterAck { .. }));
    match &frames[1].msg {
        ServerMessage::NodeRegisterError(payload) => {
            assert_eq!(payload.code, ErrorCode::Conflict)
        }
        other => panic!("expected conflict, got {}", other.kind()),
    }
    assert_eq!(c.store.list_nodes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn heartbeat_timeout_marks_unhealthy_and_late_heartbeat_revives() {
    // heartbeat_timeout = 30s. Register at t=0, silence until t=31s.
    let c = cluster();
    let agent = attach_bound(&c);
    let node = register(&c, &agent, "worker-1").await;

    c.clock.advance(Duration::from_secs(31));
    c.ctx.sweep_stale_nodes().await;
    assert_eq!(
        c.store.get_node(&node.id).await.unwrap().status,
        NodeStatus::Unhealthy
    );

    // Heartbeat at t=35s brings the node back online.
    c.clock.advance(Duration::from_secs(4));
    frame(&c, &agent, heartbeat_msg(node.id, None)).await;
    assert_eq!(
        c.store.get_node(&node.id).await.unwrap().status,
        NodeStatus::Online
    );
}

#[tokio::test]
async fn draining_is_sticky_across_statusless_heartbeats() {
    let c = cluster();
    let agent = attach_bound(&c);
    let node = register(&c, &agent, "worker-1").await;

    frame(&c, &agent, heartbeat_msg(node.id, Some(NodeStatus::Draining))).await;
    frame(&c, &agent, heartbeat_msg(node.id, None)).await;

    assert_eq!(
        c.store.get_node(&node.id).await.unwrap().status,
        NodeStatus::Draining
    );
}

#[tokio::test]
async fn unhealthy_nodes_receive_no_new_pods() {
    let c = cluster();
    let agent = attach_bound(&c);
    let _node = register(&c, &agent, "worker-1").await;

    c.clock.advance(Duration::from_secs(31));
    c.ctx.sweep_stale_nodes().await;

    let pack_id = convoy_core::PackId::new();
    c.store
        .put_pack(pack(pack_id, "1.0.0", convoy_core::RuntimeTag::Universal))
        .await
        .unwrap();
    let dep = deployment(pack_id, "1.0.0", 1);
    c.store.insert_deployment(dep.clone()).await.unwrap();

    c.ctx.reconcile_tick().await;

    let pods = c.store.list_pods_by_deployment(&dep.id).await.unwrap();
    assert_eq!(pods[0].status, convoy_core::PodStatus::Pending);
    assert_eq!(pods[0].node_id, None);
}

#[tokio::test]
async fn reconnect_after_disconnect_restores_routing() {
    let c = cluster();
    let agent = attach_bound(&c);
    let node = register(&c, &agent, "worker-1").await;

    // Channel drops: hook clears binding, no eager offline.
    let bound = c.ctx.registry.bound_nodes(&agent.conn_id);
    c.ctx.handle_node_disconnect(&agent.conn_id, &bound).await;
    c.ctx.registry.remove(&agent.conn_id);
    let stored = c.store.get_node(&node.id).await.unwrap();
    assert_eq!(stored.connection_id, None);
    assert_eq!(stored.status, NodeStatus::Online);

    // Fresh connection reconnects under the preserved node id.
    let agent2 = attach_bound(&c);
    let revived = c.ctx.reconnect_node(&agent2.conn_id, node.id).await.unwrap();
    assert_eq!(revived.connection_id, Some(agent2.conn_id));
    assert!(c.ctx.registry.is_bound_to(&agent2.conn_id, &node.id));
}

#[tokio::test]
async fn heartbeat_ack_is_best_effort() {
    // A heartbeat applied on the server stays applied even when the ack
    // can never be delivered (full/gone outbound queue).
    let c = cluster();
    let agent = attach_bound(&c);
    let node = register(&c, &agent, "worker-1").await;
    drop(agent.rx);

    c.clock.advance(Duration::from_secs(10));
    let conn_id = agent.conn_id;
    convoy_server::session::handle_frame(
        c.ctx.as_ref(),
        &conn_id,
        ClientFrame::new(heartbeat_msg(node.id, None)),
    )
    .await;

    let stored = c.store.get_node(&node.id).await.unwrap();
    assert_eq!(stored.last_heartbeat_ms, c.clock.epoch_ms());
}
