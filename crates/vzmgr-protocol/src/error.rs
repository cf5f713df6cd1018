// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Errors for envelope coding, topic parsing and transports.

use thiserror::Error;

use crate::envelope::MAX_ENVELOPE_SIZE;

/// Errors that can occur on the wire layer
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("envelope too large: {0} bytes (max: {MAX_ENVELOPE_SIZE})")]
    EnvelopeTooLarge(usize),

    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed")]
    Closed,
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ProtocolError {
    fn from(err: redis::RedisError) -> Self {
        ProtocolError::Transport(err.to_string())
    }
}
