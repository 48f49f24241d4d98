// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel layer: the WebSocket terminator.
//!
//! Accepts connections, assigns connection ids, greets with `connected`,
//! probes liveness, enforces the frame size cap, and feeds decoded frames
//! to the session dispatcher. Each connection gets a reader task plus a
//! writer pump draining its outbound queue, so slow consumers never block
//! handlers.

use convoy_core::{Clock, ConnectionId};
use convoy_wire::{decode_client, encode_server, ErrorCode, ErrorPayload, ServerFrame, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::ctx::ServerCtx;
use crate::session;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Outbound queue depth per connection. Sends beyond this are dropped with
/// a warning; the agent-side protocol tolerates a lossy channel.
const OUTBOUND_QUEUE: usize = 256;

/// Accept connections until shutdown, one task per connection.
pub async fn serve<C: Clock>(ctx: Arc<ServerCtx<C>>, listener: TcpListener) {
    let cancel = ctx.shutdown_token();
    info!("channel layer listening");
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(%addr, "inbound connection");
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            handle_socket(ctx, stream).await;
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn handle_socket<C: Clock>(ctx: Arc<ServerCtx<C>>, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };

    let conn_id = ConnectionId::new();
    let (tx, rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE);
    ctx.registry.insert(conn_id, tx, ctx.clock.epoch_ms());

    let (sink, source) = ws.split();
    let writer = tokio::spawn(write_pump(sink, rx, conn_id));

    ctx.registry.send_to_connection(
        &conn_id,
        &ServerFrame::new(ServerMessage::Connected {
            connection_id: conn_id,
            requires_auth: ctx.config.require_auth,
        }),
    );
    info!(connection = %conn_id, "connection established");

    read_loop(&ctx, conn_id, source).await;

    // Disconnect hooks run for every bound node before the registry entry
    // is dropped; status ages out through the stale sweep, never eagerly.
    let node_ids = ctx.registry.bound_nodes(&conn_id);
    ctx.handle_node_disconnect(&conn_id, &node_ids).await;
    ctx.registry.remove(&conn_id);
    info!(connection = %conn_id, nodes = node_ids.len(), "connection closed");

    // Dropping the registry entry dropped the queue sender; the pump sends
    // the 1001 close frame and exits.
    if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
        debug!(connection = %conn_id, "writer pump did not drain in time");
    }
}

async fn read_loop<C: Clock>(ctx: &Arc<ServerCtx<C>>, conn_id: ConnectionId, mut source: WsSource) {
    let cancel = ctx.shutdown_token();
    let idle_limit = ctx.config.ping_interval + ctx.config.pong_timeout;
    let mut last_traffic = ctx.clock.now();
    let mut probe = tokio::time::interval(ctx.config.ping_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    probe.reset();

    loop {
        tokio::select! {
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_traffic = ctx.clock.now();
                        handle_text(ctx, &conn_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_traffic = ctx.clock.now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection = %conn_id, ?frame, "close frame received");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary and raw frames carry nothing in this protocol.
                        last_traffic = ctx.clock.now();
                    }
                    Some(Err(e)) => {
                        warn!(connection = %conn_id, error = %e, "read error");
                        break;
                    }
                    None => {
                        debug!(connection = %conn_id, "stream ended");
                        break;
                    }
                }
            }
            _ = probe.tick() => {
                if ctx.clock.now().duration_since(last_traffic) > idle_limit {
                    warn!(connection = %conn_id, "no traffic past liveness limit, closing");
                    break;
                }
                ctx.registry.send_to_connection(
                    &conn_id,
                    &ServerFrame::new(ServerMessage::Ping { timestamp: ctx.clock.epoch_ms() }),
                );
            }
            _ = cancel.cancelled() => {
                debug!(connection = %conn_id, "shutdown, closing connection");
                break;
            }
        }
    }
}

/// Decode one text frame and dispatch it. Oversized or malformed frames
/// get an error frame; the connection stays up either way.
async fn handle_text<C: Clock>(ctx: &Arc<ServerCtx<C>>, conn_id: &ConnectionId, text: &str) {
    if text.len() > ctx.config.max_message_size {
        warn!(connection = %conn_id, size = text.len(), "frame over size limit");
        ctx.registry.send_to_connection(
            conn_id,
            &ServerFrame::new(ServerMessage::Error(ErrorPayload::new(
                ErrorCode::MessageTooLarge,
                format!("frame exceeds {} bytes", ctx.config.max_message_size),
            ))),
        );
        return;
    }

    match decode_client(text) {
        Ok(frame) => session::handle_frame(ctx.as_ref(), conn_id, frame).await,
        Err(e) => {
            debug!(connection = %conn_id, error = %e, "undecodable frame");
            ctx.registry.send_to_connection(
                conn_id,
                &ServerFrame::new(ServerMessage::Error(e.to_payload())),
            );
        }
    }
}

/// Drain the outbound queue into the socket, then close with 1001.
async fn write_pump(mut sink: WsSink, mut rx: mpsc::Receiver<ServerFrame>, conn_id: ConnectionId) {
    while let Some(frame) = rx.recv().await {
        match encode_server(&frame) {
            Ok(text) => {
                if let Err(e) = sink.send(Message::text(text)).await {
                    debug!(connection = %conn_id, error = %e, "socket write failed");
                    return;
                }
            }
            Err(e) => warn!(connection = %conn_id, error = %e, "frame encode failed"),
        }
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "going away".into(),
        })))
        .await;
}
