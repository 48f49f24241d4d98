// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame envelope and codec.
//!
//! A frame is one message plus an optional `correlationId`. Decoding keeps
//! the failure modes apart so the channel layer can answer with the right
//! error code: not JSON at all, no `type` field, a `type` nobody knows, or
//! a known `type` with a malformed payload.

use crate::client::ClientMessage;
use crate::error::{ErrorCode, ErrorPayload};
use crate::server::ServerMessage;
use convoy_core::CorrelationId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message types accepted from node agents.
pub(crate) const CLIENT_TYPES: &[&str] = &[
    "ping",
    "pong",
    "auth:authenticate",
    "node:register",
    "node:reconnect",
    "node:heartbeat",
    "pod:deploy:success",
    "pod:deploy:error",
    "pod:stop:success",
    "pod:stop:error",
    "pod:status:update",
    "metrics:node",
];

/// Message types accepted from the orchestrator.
pub(crate) const SERVER_TYPES: &[&str] = &[
    "connected",
    "ping",
    "pong",
    "auth:authenticated",
    "auth:error",
    "node:register:ack",
    "node:register:error",
    "node:reconnect:ack",
    "node:reconnect:error",
    "node:heartbeat:ack",
    "node:heartbeat:error",
    "pod:deploy",
    "pod:stop",
    "error",
    "disconnect",
];

/// Errors from encoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from decoding inbound frames, one variant per wire error code.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is not an object or has no string `type` field")]
    MissingType,
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("invalid {kind:?} payload: {detail}")]
    InvalidPayload { kind: String, detail: String },
}

impl DecodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::InvalidJson(_) => ErrorCode::InvalidJson,
            DecodeError::MissingType => ErrorCode::InvalidMessage,
            DecodeError::UnknownType(_) => ErrorCode::UnknownMessageType,
            DecodeError::InvalidPayload { .. } => ErrorCode::ValidationError,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}

/// A client message plus its optional correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(flatten)]
    pub msg: ClientMessage,
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<CorrelationId>,
}

impl ClientFrame {
    pub fn new(msg: ClientMessage) -> Self {
        Self { msg, correlation_id: None }
    }

    pub fn correlated(msg: ClientMessage, id: CorrelationId) -> Self {
        Self { msg, correlation_id: Some(id) }
    }
}

/// A server message plus its optional correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(flatten)]
    pub msg: ServerMessage,
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<CorrelationId>,
}

impl ServerFrame {
    pub fn new(msg: ServerMessage) -> Self {
        Self { msg, correlation_id: None }
    }

    pub fn correlated(msg: ServerMessage, id: CorrelationId) -> Self {
        Self { msg, correlation_id: Some(id) }
    }

    /// Echo the correlation id of the frame being answered, when present.
    pub fn replying_to(msg: ServerMessage, correlation_id: Option<CorrelationId>) -> Self {
        Self { msg, correlation_id }
    }
}

pub fn encode_client(frame: &ClientFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn encode_server(frame: &ServerFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_client(text: &str) -> Result<ClientFrame, DecodeError> {
    decode_frame(text, CLIENT_TYPES)
}

pub fn decode_server(text: &str) -> Result<ServerFrame, DecodeError> {
    decode_frame(text, SERVER_TYPES)
}

fn decode_frame<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let kind = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?
        .to_string();

    if !known.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    serde_json::from_value(value)
        .map_err(|e| DecodeError::InvalidPayload { kind, detail: e.to_string() })
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
