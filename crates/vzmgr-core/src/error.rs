// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vzmgr-core.
//!
//! Provides a unified error type for the request path. Every variant carries a
//! stable machine code (see [`CoreError::error_code`]) that a management API
//! can surface as a status.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during request processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// A request argument was malformed.
    InvalidArgument {
        /// The offending argument.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Cluster was not found (or is not visible to the caller).
    NotFound {
        /// The cluster ID that was not found.
        cluster_id: String,
    },

    /// Caller's org does not own the requested resource.
    PermissionDenied {
        /// Why access was denied.
        reason: String,
    },

    /// Cluster is already connected and cannot be claimed.
    AlreadyActive {
        /// The active cluster ID.
        cluster_id: String,
    },

    /// Collaborator or invariant failure.
    Internal {
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    pub(crate) fn invalid_argument(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(cluster_id: impl fmt::Display) -> Self {
        Self::NotFound {
            cluster_id: cluster_id.to_string(),
        }
    }

    pub(crate) fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub(crate) fn internal(details: impl fmt::Display) -> Self {
        Self::Internal {
            details: details.to_string(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::AlreadyActive { .. } => "ALREADY_ACTIVE",
            Self::Internal { .. } => "INTERNAL",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { field, message } => {
                write!(f, "Invalid argument '{}': {}", field, message)
            }
            Self::NotFound { cluster_id } => {
                write!(f, "Cluster '{}' not found", cluster_id)
            }
            Self::PermissionDenied { reason } => {
                write!(f, "Permission denied: {}", reason)
            }
            Self::AlreadyActive { cluster_id } => {
                write!(f, "Cluster '{}' is already active", cluster_id)
            }
            Self::Internal { details } => {
                write!(f, "Internal error: {}", details)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal {
            details: format!("json: {}", err),
        }
    }
}

impl From<vzmgr_protocol::ProtocolError> for CoreError {
    fn from(err: vzmgr_protocol::ProtocolError) -> Self {
        CoreError::Internal {
            details: format!("bus: {}", err),
        }
    }
}
