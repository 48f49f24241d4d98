// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler errors and their mapping to wire error codes.
//!
//! Expected failures (validation, not-found, conflict, authorization) are
//! ordinary values here; they become `*:error` frames and never tear down
//! the channel.

use convoy_store::StoreError;
use convoy_wire::{ErrorCode, ErrorPayload};
use thiserror::Error;

/// Failure of one message handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => HandlerError::NotFound(format!("{kind} {id}")),
            StoreError::Conflict(msg) => HandlerError::Conflict(msg),
            other => HandlerError::Store(other),
        }
    }
}

impl HandlerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerError::Unauthorized(_) => ErrorCode::Unauthorized,
            HandlerError::Forbidden(_) => ErrorCode::Forbidden,
            HandlerError::NotFound(_) => ErrorCode::NotFound,
            HandlerError::Conflict(_) => ErrorCode::Conflict,
            HandlerError::Validation(_) => ErrorCode::ValidationError,
            HandlerError::Store(_) => ErrorCode::Internal,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}
