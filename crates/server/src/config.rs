// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Behavior-bearing configuration for the control plane.

use std::time::Duration;

/// Tunables for the channel layer, node lifecycle, and reconciler.
/// Defaults match the documented protocol behavior; override through
/// [`crate::env`] or the binary's flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Liveness probe interval per connection.
    pub ping_interval: Duration,
    /// Grace after a missed probe before the connection is force-closed.
    pub pong_timeout: Duration,
    /// Inbound frame size cap; larger frames get MESSAGE_TOO_LARGE.
    pub max_message_size: usize,
    /// Reject node-scope operations from unauthenticated connections.
    pub require_auth: bool,
    /// Silence after which a node is swept to `unhealthy`.
    pub heartbeat_timeout: Duration,
    /// Interval of the stale-node sweep.
    pub stale_sweep_interval: Duration,
    /// Interval of the reconcile loop.
    pub reconcile_interval: Duration,
    /// Application failures that trip crash-loop handling.
    pub max_consecutive_failures: u32,
    /// First crash-loop backoff; doubles per failure count.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Window for counting recent application failures.
    pub failure_detection_window: Duration,
    /// Deadline for pod:deploy / pod:stop round-trips.
    pub rpc_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024,
            require_auth: true,
            heartbeat_timeout: Duration::from_secs(30),
            stale_sweep_interval: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(10),
            max_consecutive_failures: 3,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(3600),
            failure_detection_window: Duration::from_secs(60),
            rpc_timeout: Duration::from_secs(30),
        }
    }
}
