// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent runtime: one task driving the connection state machine.
//!
//! The session loop owns the socket; worker-pool status events, heartbeat
//! and metrics timers, and the credential refresh check all feed the same
//! `select!`. Reconnects preserve the node id and prefer `node:reconnect`,
//! falling back to `node:register` when the orchestrator lost the node.

use convoy_core::{Clock, CorrelationId, Node, NodeId, SystemClock};
use convoy_wire::{
    decode_server, encode_client, ClientFrame, ClientMessage, ErrorCode, HeartbeatPayload,
    NodeMetricsPayload, NodeRegistration, PodStatusReport, ServerMessage,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::AgentConfig;
use crate::credentials::{CredentialStore, PersistedNodeState};
use crate::error::AgentError;
use crate::executor::{PackRunner, StatusEvent, WorkerPool};
use crate::state::AgentPhase;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// How a session ended, seen from the reconnect loop.
enum SessionEnd {
    /// Channel lost or orchestrator asked us to go; retry with backoff.
    Retry { registered: bool },
    /// Hard AUTH_FAILED: clear cached credentials and retry once.
    AuthFailed,
    /// Agent stop requested.
    Shutdown,
}

/// The node-side agent.
pub struct Agent {
    config: AgentConfig,
    runner: Arc<dyn PackRunner>,
    store: Option<CredentialStore>,
    api: Option<ApiClient>,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig, runner: Arc<dyn PackRunner>) -> Result<Self, AgentError> {
        let store = match &config.state_dir {
            Some(dir) => Some(CredentialStore::at(dir.clone())),
            None => CredentialStore::open_default().ok(),
        };
        let api = match &config.api_url {
            Some(url) => Some(ApiClient::new(url.clone()).map_err(AgentError::Api)?),
            None => None,
        };
        Ok(Self {
            config,
            runner,
            store,
            api,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the agent; in-flight work is aborted and the
    /// connection closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until stopped or the reconnect budget is spent.
    pub async fn run(&self) -> Result<(), AgentError> {
        let (status_tx, mut status_rx) = mpsc::channel::<StatusEvent>(256);
        let pool = WorkerPool::new(self.config.worker_slots, Arc::clone(&self.runner), status_tx);
        let mut node_id = self.load_node_id();
        let mut attempts: u32 = 0;
        let mut auth_cleared = false;

        loop {
            if self.cancel.is_cancelled() {
                pool.abort_all();
                return Ok(());
            }

            let token = self.acquire_token().await?;
            info!(
                phase = %AgentPhase::Connecting,
                url = %self.config.orchestrator_url,
                node = ?node_id,
                "connecting to orchestrator"
            );

            let outcome = match connect_async(&self.config.orchestrator_url).await {
                Ok((ws, _)) => {
                    self.run_session(ws, token.as_deref(), &pool, &mut status_rx, &mut node_id)
                        .await
                }
                Err(e) => {
                    warn!(error = %e, "connection failed");
                    Err(AgentError::Connect(e.to_string()))
                }
            };

            match outcome {
                Ok(SessionEnd::Shutdown) => {
                    pool.abort_all();
                    return Ok(());
                }
                Ok(SessionEnd::AuthFailed) => {
                    if auth_cleared {
                        return Err(AgentError::AuthRejected(
                            "credentials rejected after re-acquisition".to_string(),
                        ));
                    }
                    auth_cleared = true;
                    if let Some(store) = &self.store {
                        let _ = store.clear_credentials(&self.config.orchestrator_url);
                    }
                    info!("cached credentials cleared after AUTH_FAILED, retrying");
                    continue;
                }
                Ok(SessionEnd::Retry { registered }) => {
                    if registered {
                        attempts = 0;
                        auth_cleared = false;
                    }
                }
                Err(e) => debug!(error = %e, "session ended with error"),
            }

            attempts += 1;
            if !self.config.may_retry(attempts) {
                return Err(AgentError::ReconnectExhausted(attempts));
            }
            let delay = self.config.reconnect_backoff(attempts);
            info!(
                phase = %AgentPhase::Disconnected,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    pool.abort_all();
                    return Ok(());
                }
            }
        }
    }

    async fn run_session(
        &self,
        ws: WsStream,
        token: Option<&str>,
        pool: &WorkerPool,
        status_rx: &mut mpsc::Receiver<StatusEvent>,
        node_id: &mut Option<NodeId>,
    ) -> Result<SessionEnd, AgentError> {
        let clock = SystemClock;
        let (mut sink, mut source) = ws.split();
        let mut phase = AgentPhase::Connected;
        let mut registered_once = false;
        let mut deadline = tokio::time::Instant::now() + self.config.rpc_timeout;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        let mut metrics = tokio::time::interval(self.config.metrics_interval);
        let mut refresh = tokio::time::interval(self.config.token_refresh_check);
        for ticker in [&mut heartbeat, &mut metrics, &mut refresh] {
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                msg = source.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "orchestrator closed the channel");
                            return Ok(SessionEnd::Retry { registered: registered_once });
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "channel read error");
                            return Ok(SessionEnd::Retry { registered: registered_once });
                        }
                        None => {
                            debug!("channel stream ended");
                            return Ok(SessionEnd::Retry { registered: registered_once });
                        }
                    };
                    let frame = match decode_server(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "undecodable frame from orchestrator");
                            continue;
                        }
                    };
                    match self
                        .handle_server_frame(
                            frame.msg,
                            frame.correlation_id,
                            &mut phase,
                            &mut sink,
                            pool,
                            node_id,
                            token,
                        )
                        .await?
                    {
                        Some(end) => return Ok(end),
                        None => {
                            if phase.is_registered() {
                                registered_once = true;
                            } else {
                                deadline = tokio::time::Instant::now() + self.config.rpc_timeout;
                            }
                        }
                    }
                }
                Some(event) = status_rx.recv(), if phase.is_registered() => {
                    let report = PodStatusReport {
                        pod_id: event.pod_id,
                        status: event.status,
                        message: event.message,
                        reason: event.reason,
                        incarnation: event.incarnation,
                    };
                    send(&mut sink, ClientFrame::new(ClientMessage::PodStatusUpdate(report)))
                        .await?;
                }
                _ = heartbeat.tick(), if phase.is_registered() => {
                    if let Some(id) = *node_id {
                        let payload = HeartbeatPayload {
                            node_id: id,
                            timestamp: clock.epoch_ms(),
                            status: None,
                            allocated: Some(pool.allocated()),
                            active_pods: Some(pool.active_pods()),
                        };
                        send(&mut sink, ClientFrame::new(ClientMessage::NodeHeartbeat(payload)))
                            .await?;
                    }
                }
                _ = metrics.tick(), if phase.is_registered() => {
                    if let Some(id) = *node_id {
                        let (pool_stats, pods) = pool.metrics();
                        let payload = NodeMetricsPayload {
                            node_id: id,
                            timestamp: clock.epoch_ms(),
                            allocated: pool.allocated(),
                            pool: pool_stats,
                            pods,
                        };
                        send(&mut sink, ClientFrame::new(ClientMessage::NodeMetrics(payload)))
                            .await?;
                    }
                }
                _ = refresh.tick(), if phase.is_registered() => {
                    self.rotate_credentials_if_due().await;
                }
                _ = tokio::time::sleep_until(deadline), if phase.in_handshake() => {
                    warn!(phase = %phase, "handshake deadline passed");
                    return Err(AgentError::HandshakeTimeout(phase));
                }
                _ = self.cancel.cancelled() => {
                    info!("agent stopping, closing channel");
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    /// Advance the state machine for one inbound frame. Returns a session
    /// end to propagate, or `None` to continue.
    #[allow(clippy::too_many_arguments)]
    async fn handle_server_frame(
        &self,
        msg: ServerMessage,
        correlation: Option<CorrelationId>,
        phase: &mut AgentPhase,
        sink: &mut WsSink,
        pool: &WorkerPool,
        node_id: &mut Option<NodeId>,
        token: Option<&str>,
    ) -> Result<Option<SessionEnd>, AgentError> {
        match msg {
            ServerMessage::Connected { requires_auth, .. } => {
                if *phase != AgentPhase::Connected {
                    debug!(phase = %phase, "unexpected connected frame");
                    return Ok(None);
                }
                if requires_auth {
                    let Some(token) = token else {
                        return Err(AgentError::AuthRejected(
                            "orchestrator requires auth and no credential is available"
                                .to_string(),
                        ));
                    };
                    *phase = AgentPhase::Authenticating;
                    info!(phase = %phase, "authenticating");
                    send(
                        sink,
                        ClientFrame::correlated(
                            ClientMessage::Authenticate { token: token.to_string() },
                            CorrelationId::new(),
                        ),
                    )
                    .await?;
                } else {
                    *phase = AgentPhase::Authenticated;
                    self.start_registration(phase, sink, node_id).await?;
                }
                Ok(None)
            }
            ServerMessage::Authenticated { user_id, .. } => {
                info!(user = %user_id, "authenticated");
                *phase = AgentPhase::Authenticated;
                self.start_registration(phase, sink, node_id).await?;
                Ok(None)
            }
            ServerMessage::AuthError(payload) => {
                warn!(code = %payload.code, message = %payload.message, "authentication failed");
                if payload.code == ErrorCode::AuthFailed {
                    Ok(Some(SessionEnd::AuthFailed))
                } else {
                    Err(AgentError::AuthRejected(payload.message))
                }
            }
            ServerMessage::NodeReconnectAck { node } => {
                self.enter_registered(phase, node_id, &node);
                Ok(None)
            }
            ServerMessage::NodeReconnectError(payload) => {
                // Orchestrator no longer knows the node; fall back to a
                // fresh registration under the preserved name.
                info!(message = %payload.message, "reconnect refused, registering fresh");
                *node_id = None;
                send(
                    sink,
                    ClientFrame::correlated(
                        ClientMessage::NodeRegister(self.registration_payload()),
                        CorrelationId::new(),
                    ),
                )
                .await?;
                Ok(None)
            }
            ServerMessage::NodeRegisterAck { node } => {
                self.enter_registered(phase, node_id, &node);
                self.persist_node(&node);
                Ok(None)
            }
            ServerMessage::NodeRegisterError(payload) => {
                Err(AgentError::RegisterRejected(payload.message))
            }
            ServerMessage::Ping { timestamp } => {
                send(sink, ClientFrame::new(ClientMessage::Pong { timestamp })).await?;
                Ok(None)
            }
            ServerMessage::Pong { .. } => Ok(None),
            ServerMessage::NodeHeartbeatAck { .. } => Ok(None),
            ServerMessage::NodeHeartbeatError(payload) => {
                warn!(code = %payload.code, message = %payload.message, "heartbeat rejected");
                Ok(None)
            }
            ServerMessage::PodDeploy(assignment) => {
                let pod_id = assignment.pod_id;
                let reply = match pool.deploy(assignment).await {
                    Ok(()) => ClientMessage::PodDeploySuccess { pod_id },
                    Err(message) => {
                        warn!(pod = %pod_id, message, "deploy refused");
                        ClientMessage::PodDeployError { pod_id, message }
                    }
                };
                send(sink, reply_frame(reply, correlation)).await?;
                Ok(None)
            }
            ServerMessage::PodStop { pod_id, reason, message } => {
                let stopped = pool
                    .stop(pod_id, reason, message, self.config.stop_grace)
                    .await;
                let reply = if stopped {
                    ClientMessage::PodStopSuccess { pod_id }
                } else {
                    ClientMessage::PodStopError {
                        pod_id,
                        message: "no worker for pod".to_string(),
                    }
                };
                send(sink, reply_frame(reply, correlation)).await?;
                Ok(None)
            }
            ServerMessage::Error(payload) => {
                warn!(code = %payload.code, message = %payload.message, "error frame");
                Ok(None)
            }
            ServerMessage::Disconnect { reason } => {
                info!(reason, "orchestrator disconnecting us");
                Ok(Some(SessionEnd::Retry { registered: *phase == AgentPhase::Registered }))
            }
        }
    }

    /// Send `node:reconnect` when a node id is preserved, otherwise a
    /// fresh `node:register`.
    async fn start_registration(
        &self,
        phase: &mut AgentPhase,
        sink: &mut WsSink,
        node_id: &mut Option<NodeId>,
    ) -> Result<(), AgentError> {
        *phase = AgentPhase::Registering;
        info!(phase = %phase, node = ?node_id, "registering with orchestrator");
        let msg = match *node_id {
            Some(id) => ClientMessage::NodeReconnect { node_id: id },
            None => ClientMessage::NodeRegister(self.registration_payload()),
        };
        send(sink, ClientFrame::correlated(msg, CorrelationId::new())).await
    }

    fn enter_registered(&self, phase: &mut AgentPhase, node_id: &mut Option<NodeId>, node: &Node) {
        *phase = AgentPhase::Registered;
        *node_id = Some(node.id);
        info!(phase = %phase, node = %node.name, id = %node.id, "node registered");
    }

    fn registration_payload(&self) -> NodeRegistration {
        NodeRegistration {
            name: self.config.name.clone(),
            runtime_type: self.config.runtime_type,
            capabilities: self.config.capabilities.clone(),
            allocatable: self.config.allocatable,
            labels: self.config.labels.clone(),
            annotations: self.config.annotations.clone(),
            taints: self.config.taints.clone(),
        }
    }

    fn load_node_id(&self) -> Option<NodeId> {
        let store = self.store.as_ref()?;
        match store.load(&self.config.orchestrator_url) {
            Ok(state) => state.and_then(|s| s.node_id),
            Err(e) => {
                warn!(error = %e, "failed to load persisted node state");
                None
            }
        }
    }

    fn persist_node(&self, node: &Node) {
        let Some(store) = &self.store else {
            return;
        };
        let now = SystemClock.epoch_ms();
        let mut state = store
            .load(&self.config.orchestrator_url)
            .ok()
            .flatten()
            .unwrap_or_else(|| PersistedNodeState {
                node_id: None,
                name: self.config.name.clone(),
                orchestrator_url: self.config.orchestrator_url.clone(),
                registered_at: now,
                last_started: now,
                credentials: None,
            });
        state.node_id = Some(node.id);
        state.last_started = now;
        if let Err(e) = store.save(&state) {
            warn!(error = %e, "failed to persist node state");
        }
    }

    /// Resolve the bearer token: explicit config token, stored credential
    /// (rotated when near expiry), or machine-user bootstrap when the
    /// orchestrator permits public sign-up.
    async fn acquire_token(&self) -> Result<Option<String>, AgentError> {
        if let Some(token) = &self.config.token {
            return Ok(Some(token.clone()));
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let now = SystemClock.epoch_ms();

        if let Some(state) = store.load(&self.config.orchestrator_url)? {
            if let Some(creds) = &state.credentials {
                if !creds.expires_within(now, 60_000) {
                    return Ok(Some(creds.access_token.clone()));
                }
                if let (Some(refresh_token), Some(api)) = (&creds.refresh_token, &self.api) {
                    match api.refresh(refresh_token).await {
                        Ok(rotated) => {
                            let token = rotated.access_token.clone();
                            let mut updated = state.clone();
                            updated.credentials = Some(rotated);
                            let _ = store.save(&updated);
                            info!("rotated credentials via refresh token");
                            return Ok(Some(token));
                        }
                        Err(e) => warn!(error = %e, "refresh failed, attempting re-registration"),
                    }
                }
            }
        }

        let Some(api) = &self.api else {
            return Ok(None);
        };
        match api.registration_status().await {
            Ok(status) if status.registration_enabled => {
                let creds = api
                    .register_machine_user(&self.config.name)
                    .await
                    .map_err(AgentError::Api)?;
                let token = creds.access_token.clone();
                let state = PersistedNodeState {
                    node_id: self.load_node_id(),
                    name: self.config.name.clone(),
                    orchestrator_url: self.config.orchestrator_url.clone(),
                    registered_at: now,
                    last_started: now,
                    credentials: Some(creds),
                };
                let _ = store.save(&state);
                Ok(Some(token))
            }
            Ok(_) => {
                debug!("public registration disabled and no stored credential");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "registration status unavailable");
                Ok(None)
            }
        }
    }

    /// Rotate stored credentials ahead of expiry so the next reconnect
    /// authenticates without a round-trip to the registration endpoint.
    async fn rotate_credentials_if_due(&self) {
        let (Some(store), Some(api)) = (&self.store, &self.api) else {
            return;
        };
        let now = SystemClock.epoch_ms();
        let Ok(Some(state)) = store.load(&self.config.orchestrator_url) else {
            return;
        };
        let Some(creds) = &state.credentials else {
            return;
        };
        // Rotate inside a five-minute window before expiry.
        if !creds.expires_within(now, 300_000) {
            return;
        }
        let Some(refresh_token) = &creds.refresh_token else {
            return;
        };
        match api.refresh(refresh_token).await {
            Ok(rotated) => {
                let mut updated = state.clone();
                updated.credentials = Some(rotated);
                let _ = store.save(&updated);
                info!("credentials rotated ahead of expiry");
            }
            Err(e) => warn!(error = %e, "credential rotation failed"),
        }
    }
}

fn reply_frame(msg: ClientMessage, correlation: Option<CorrelationId>) -> ClientFrame {
    match correlation {
        Some(id) => ClientFrame::correlated(msg, id),
        None => ClientFrame::new(msg),
    }
}

async fn send(sink: &mut WsSink, frame: ClientFrame) -> Result<(), AgentError> {
    let text = encode_client(&frame).map_err(|e| AgentError::Protocol(e.to_string()))?;
    sink.send(Message::text(text))
        .await
        .map_err(|e| AgentError::Connect(e.to_string()))
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
