// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared control-plane context.
//!
//! One `ServerCtx` is built by the composition root and passed by
//! reference to the channel layer, reconciler, and sweep tasks.

use convoy_core::{Clock, ConnectionId, CorrelationId, DeploymentId, NodeId};
use convoy_store::Store;
use convoy_wire::{NodeMetricsPayload, ServerFrame, ServerMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{AuthProvider, Identity, ROLE_NODES_WRITE};
use crate::config::ServerConfig;
use crate::dispatch::InFlightRpc;
use crate::error::HandlerError;
use crate::registry::{ConnIdentity, ConnectionRegistry};
use crate::scheduler::Scheduler;

/// Control-plane state shared by every task.
pub struct ServerCtx<C: Clock> {
    pub config: ServerConfig,
    pub clock: C,
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn AuthProvider>,
    pub registry: Arc<ConnectionRegistry>,
    pub scheduler: Scheduler,
    /// In-flight pod:deploy / pod:stop RPCs keyed by correlation id.
    pub(crate) rpcs: Mutex<HashMap<CorrelationId, InFlightRpc>>,
    /// Latest metrics frame per node, refreshed on every metrics:node.
    pub(crate) metrics: Mutex<HashMap<NodeId, NodeMetricsPayload>>,
    /// Per-deployment watermark of already-counted pod failures, so one
    /// failed pod feeds the consecutive-failure tally exactly once.
    pub(crate) failure_cursor: Mutex<HashMap<DeploymentId, u64>>,
    pub(crate) reconcile_notify: Notify,
    pub(crate) reconcile_pending: AtomicBool,
    shutdown: CancellationToken,
}

impl<C: Clock> ServerCtx<C> {
    pub fn new(
        config: ServerConfig,
        clock: C,
        store: Arc<dyn Store>,
        auth: Arc<dyn AuthProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            store,
            auth,
            registry: Arc::new(ConnectionRegistry::new()),
            scheduler: Scheduler::new(),
            rpcs: Mutex::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
            failure_cursor: Mutex::new(HashMap::new()),
            reconcile_notify: Notify::new(),
            reconcile_pending: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    /// Request an extra reconcile pass. Calls made while a pass is running
    /// coalesce into at most one follow-up cycle.
    pub fn trigger_reconcile(&self) {
        self.reconcile_pending.store(true, Ordering::SeqCst);
        self.reconcile_notify.notify_one();
    }

    pub(crate) fn take_reconcile_pending(&self) -> bool {
        self.reconcile_pending.swap(false, Ordering::SeqCst)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Begin shutdown: notify every connection, drop in-flight RPCs, and
    /// cancel all tasks. Connections close with code 1001 as their handlers
    /// unwind.
    pub fn shutdown(&self, reason: &str) {
        info!(reason, "server shutting down");
        let frame = ServerFrame::new(ServerMessage::Disconnect { reason: reason.to_string() });
        self.registry.broadcast(&frame, |_| true);
        self.rpcs.lock().clear();
        self.shutdown.cancel();
    }

    /// Resolve the agent identity behind a connection.
    ///
    /// With `require_auth` disabled the anonymous identity carries node
    /// registration rights, matching the zero-config single-node setup.
    pub fn agent_identity(&self, conn_id: &ConnectionId) -> Result<Identity, HandlerError> {
        match self.registry.identity(conn_id) {
            Some(ConnIdentity::Agent(identity)) => Ok(identity),
            Some(ConnIdentity::Unauthenticated) if !self.config.require_auth => Ok(
                Identity::new("anonymous", vec![ROLE_NODES_WRITE.to_string()]),
            ),
            Some(_) => Err(HandlerError::Unauthorized(
                "authentication required".to_string(),
            )),
            None => Err(HandlerError::Unauthorized("unknown connection".to_string())),
        }
    }
}

#[cfg(test)]
#[path = "ctx_tests.rs"]
mod tests;
