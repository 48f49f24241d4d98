// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol between the orchestrator and node agents.
//!
//! Frames are single JSON text objects `{type, payload, correlationId?}`
//! carried over a persistent bidirectional channel. Message types are
//! namespaced strings (`node:register`, `pod:deploy`, ...); payloads are
//! typed per message.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod error;
mod frame;
mod server;

pub use client::{
    ClientMessage, HeartbeatPayload, NodeMetricsPayload, NodeRegistration, PodMetrics,
    PodStatusReport, PoolStats,
};
pub use error::{ErrorCode, ErrorPayload};
pub use frame::{
    decode_client, decode_server, encode_client, encode_server, ClientFrame, DecodeError,
    ProtocolError, ServerFrame,
};
pub use server::{PackManifest, PodAssignment, ServerMessage};
