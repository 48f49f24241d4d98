// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session dispatch tests: auth gating, replies, correlation echo.

use super::*;
use crate::test_helpers::{
    connect, connect_unauthenticated, drain, registration, setup, TEST_TOKEN,
};
use convoy_core::CorrelationId;
use convoy_wire::{ClientMessage, ErrorCode, HeartbeatPayload};

fn correlated(msg: ClientMessage) -> (ClientFrame, CorrelationId) {
    let id = CorrelationId::new();
    (ClientFrame::correlated(msg, id), id)
}

#[tokio::test]
async fn ping_gets_pong_with_same_correlation() {
    let t = setup();
    let (conn, mut rx) = connect_unauthenticated(&t);

    let (frame, id) = correlated(ClientMessage::Ping { timestamp: 77 });
    handle_frame(t.ctx.as_ref(), &conn, frame).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0].msg, ServerMessage::Pong { timestamp: 77 }));
    assert_eq!(frames[0].correlation_id, Some(id));
}

#[tokio::test]
async fn node_ops_require_auth_before_dispatch() {
    let t = setup();
    let (conn, mut rx) = connect_unauthenticated(&t);

    let (frame, id) = correlated(ClientMessage::NodeRegister(registration("worker-1")));
    handle_frame(t.ctx.as_ref(), &conn, frame).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    match &frames[0].msg {
        ServerMessage::Error(payload) => assert_eq!(payload.code, ErrorCode::Unauthorized),
        other => panic!("expected error frame, got {}", other.kind()),
    }
    assert_eq!(frames[0].correlation_id, Some(id));
}

#[tokio::test]
async fn authenticate_binds_identity_and_acks() {
    let t = setup();
    let (conn, mut rx) = connect_unauthenticated(&t);

    handle_frame(
        t.ctx.as_ref(),
        &conn,
        ClientFrame::new(ClientMessage::Authenticate { token: TEST_TOKEN.to_string() }),
    )
    .await;

    let frames = drain(&mut rx);
    assert!(matches!(frames[0].msg, ServerMessage::Authenticated { .. }));
    assert!(t.ctx.agent_identity(&conn).is_ok());
}

#[tokio::test]
async fn bad_token_yields_auth_failed_without_binding() {
    let t = setup();
    let (conn, mut rx) = connect_unauthenticated(&t);

    handle_frame(
        t.ctx.as_ref(),
        &conn,
        ClientFrame::new(ClientMessage::Authenticate { token: "wrong".to_string() }),
    )
    .await;

    let frames = drain(&mut rx);
    match &frames[0].msg {
        ServerMessage::AuthError(payload) => assert_eq!(payload.code, ErrorCode::AuthFailed),
        other => panic!("expected auth:error, got {}", other.kind()),
    }
    assert!(t.ctx.agent_identity(&conn).is_err());
}

#[tokio::test]
async fn register_flow_over_frames() {
    let t = setup();
    let (conn, mut rx) = connect(&t);

    let (frame, id) = correlated(ClientMessage::NodeRegister(registration("worker-1")));
    handle_frame(t.ctx.as_ref(), &conn, frame).await;

    let frames = drain(&mut rx);
    match &frames[0].msg {
        ServerMessage::NodeRegisterAck { node } => {
            assert_eq!(node.name, "worker-1");
        }
        other => panic!("expected ack, got {}", other.kind()),
    }
    assert_eq!(frames[0].correlation_id, Some(id));

    // Same name again: CONFLICT on the same correlation pattern.
    let (frame, _) = correlated(ClientMessage::NodeRegister(registration("worker-1")));
    handle_frame(t.ctx.as_ref(), &conn, frame).await;
    let frames = drain(&mut rx);
    match &frames[0].msg {
        ServerMessage::NodeRegisterError(payload) => {
            assert_eq!(payload.code, ErrorCode::Conflict)
        }
        other => panic!("expected register error, got {}", other.kind()),
    }
}

#[tokio::test]
async fn heartbeat_frame_acks_with_timestamp() {
    let t = setup();
    let (conn, mut rx) = connect(&t);

    let (frame, _) = correlated(ClientMessage::NodeRegister(registration("worker-1")));
    handle_frame(t.ctx.as_ref(), &conn, frame).await;
    let node_id = match &drain(&mut rx)[0].msg {
        ServerMessage::NodeRegisterAck { node } => node.id,
        other => panic!("expected ack, got {}", other.kind()),
    };

    handle_frame(
        t.ctx.as_ref(),
        &conn,
        ClientFrame::new(ClientMessage::NodeHeartbeat(HeartbeatPayload {
            node_id,
            timestamp: 5,
            status: None,
            allocated: None,
            active_pods: None,
        })),
    )
    .await;

    let frames = drain(&mut rx);
    assert!(matches!(frames[0].msg, ServerMessage::NodeHeartbeatAck { .. }));
}

#[tokio::test]
async fn metrics_frames_are_absorbed_silently() {
    let t = setup();
    let (conn, mut rx) = connect(&t);

    let (frame, _) = correlated(ClientMessage::NodeRegister(registration("worker-1")));
    handle_frame(t.ctx.as_ref(), &conn, frame).await;
    let node_id = match &drain(&mut rx)[0].msg {
        ServerMessage::NodeRegisterAck { node } => node.id,
        other => panic!("expected ack, got {}", other.kind()),
    };

    handle_frame(
        t.ctx.as_ref(),
        &conn,
        ClientFrame::new(ClientMessage::NodeMetrics(convoy_wire::NodeMetricsPayload {
            node_id,
            timestamp: 9,
            allocated: convoy_core::Resources::ZERO,
            pool: convoy_wire::PoolStats { slots: 2, busy: 1 },
            pods: vec![],
        })),
    )
    .await;

    assert!(drain(&mut rx).is_empty());
    assert_eq!(t.ctx.node_metrics(&node_id).unwrap().timestamp, 9);
}
