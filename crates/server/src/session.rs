// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection message dispatch.
//!
//! One decoded frame in, zero or one reply frames out. Handler failures
//! become `*:error` frames on the same correlation id; nothing here ever
//! tears down the channel.

use convoy_core::{Clock, ConnectionId};
use convoy_wire::{
    ClientFrame, ClientMessage, ErrorCode, ErrorPayload, ServerFrame, ServerMessage,
};
use tracing::debug;

use crate::ctx::ServerCtx;
use crate::registry::ConnIdentity;

/// Dispatch one inbound frame. Messages from a single connection arrive
/// here sequentially; cross-connection handling is concurrent.
pub async fn handle_frame<C: Clock>(
    ctx: &ServerCtx<C>,
    conn_id: &ConnectionId,
    frame: ClientFrame,
) {
    ctx.registry.touch(conn_id, ctx.clock.epoch_ms());
    let correlation = frame.correlation_id;

    // Central auth gate; handlers add their own role/binding checks.
    if frame.msg.requires_auth() && ctx.config.require_auth {
        if ctx.agent_identity(conn_id).is_err() {
            reply(
                ctx,
                conn_id,
                ServerFrame::replying_to(
                    ServerMessage::Error(ErrorPayload::new(
                        ErrorCode::Unauthorized,
                        "authentication required",
                    )),
                    correlation,
                ),
            );
            return;
        }
    }

    match frame.msg {
        ClientMessage::Ping { timestamp } => {
            reply(
                ctx,
                conn_id,
                ServerFrame::replying_to(ServerMessage::Pong { timestamp }, correlation),
            );
        }
        ClientMessage::Pong { .. } => {}
        ClientMessage::Authenticate { token } => {
            let msg = match ctx.auth.verify(&token).await {
                Ok(identity) => {
                    debug!(connection = %conn_id, user = %identity.user_id, "connection authenticated");
                    ctx.registry.bind(conn_id, ConnIdentity::Agent(identity.clone()));
                    ServerMessage::Authenticated {
                        user_id: identity.user_id,
                        roles: identity.roles,
                    }
                }
                Err(e) => ServerMessage::AuthError(ErrorPayload::new(
                    ErrorCode::AuthFailed,
                    e.to_string(),
                )),
            };
            reply(ctx, conn_id, ServerFrame::replying_to(msg, correlation));
        }
        ClientMessage::NodeRegister(registration) => {
            let msg = match ctx.register_node(conn_id, registration).await {
                Ok(node) => ServerMessage::NodeRegisterAck { node: Box::new(node) },
                Err(e) => ServerMessage::NodeRegisterError(e.to_payload()),
            };
            reply(ctx, conn_id, ServerFrame::replying_to(msg, correlation));
        }
        ClientMessage::NodeReconnect { node_id } => {
            let msg = match ctx.reconnect_node(conn_id, node_id).await {
                Ok(node) => ServerMessage::NodeReconnectAck { node: Box::new(node) },
                Err(e) => ServerMessage::NodeReconnectError(e.to_payload()),
            };
            reply(ctx, conn_id, ServerFrame::replying_to(msg, correlation));
        }
        ClientMessage::NodeHeartbeat(payload) => {
            // Acks are best-effort; a lost ack never invalidates the
            // heartbeat already applied on this side.
            let msg = match ctx.heartbeat(conn_id, payload).await {
                Ok(timestamp) => ServerMessage::NodeHeartbeatAck { timestamp },
                Err(e) => ServerMessage::NodeHeartbeatError(e.to_payload()),
            };
            reply(ctx, conn_id, ServerFrame::replying_to(msg, correlation));
        }
        ClientMessage::PodStatusUpdate(report) => {
            if let Err(e) = ctx.handle_status_update(conn_id, report).await {
                reply(
                    ctx,
                    conn_id,
                    ServerFrame::replying_to(ServerMessage::Error(e.to_payload()), correlation),
                );
            }
        }
        ClientMessage::PodDeploySuccess { pod_id } => {
            ctx.handle_deploy_reply(correlation, pod_id, None).await;
        }
        ClientMessage::PodDeployError { pod_id, message } => {
            ctx.handle_deploy_reply(correlation, pod_id, Some(message)).await;
        }
        ClientMessage::PodStopSuccess { pod_id } => {
            ctx.handle_stop_reply(correlation, pod_id, None).await;
        }
        ClientMessage::PodStopError { pod_id, message } => {
            ctx.handle_stop_reply(correlation, pod_id, Some(message)).await;
        }
        ClientMessage::NodeMetrics(payload) => {
            ctx.record_metrics(payload);
        }
    }
}

fn reply<C: Clock>(ctx: &ServerCtx<C>, conn_id: &ConnectionId, frame: ServerFrame) {
    if !ctx.registry.send_to_connection(conn_id, &frame) {
        debug!(connection = %conn_id, kind = frame.msg.kind(), "reply dropped, connection gone");
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
