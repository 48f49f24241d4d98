// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the server crate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ServerConfig;

/// Bind address for the channel listener (`CONVOY_BIND`).
pub fn bind_addr() -> SocketAddr {
    std::env::var("CONVOY_BIND")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 7420)))
}

/// Static auth token (`CONVOY_AUTH_TOKEN`). When unset the daemon runs
/// without authentication, for single-node setups.
pub fn auth_token() -> Option<String> {
    std::env::var("CONVOY_AUTH_TOKEN").ok().filter(|s| !s.is_empty())
}

/// Log directory (`CONVOY_LOG_DIR`); stderr-only when unset.
pub fn log_dir() -> Option<PathBuf> {
    std::env::var("CONVOY_LOG_DIR").ok().map(PathBuf::from)
}

fn duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Apply environment overrides on top of the defaults.
pub fn apply_overrides(mut config: ServerConfig) -> ServerConfig {
    if let Some(d) = duration_ms("CONVOY_PING_INTERVAL_MS") {
        config.ping_interval = d;
    }
    if let Some(d) = duration_ms("CONVOY_PONG_TIMEOUT_MS") {
        config.pong_timeout = d;
    }
    if let Some(d) = duration_ms("CONVOY_HEARTBEAT_TIMEOUT_MS") {
        config.heartbeat_timeout = d;
    }
    if let Some(d) = duration_ms("CONVOY_STALE_SWEEP_INTERVAL_MS") {
        config.stale_sweep_interval = d;
    }
    if let Some(d) = duration_ms("CONVOY_RECONCILE_INTERVAL_MS") {
        config.reconcile_interval = d;
    }
    if let Ok(s) = std::env::var("CONVOY_MAX_MESSAGE_SIZE") {
        if let Ok(n) = s.parse::<usize>() {
            config.max_message_size = n;
        }
    }
    config
}
