// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared state of the connectivity controller.
//!
//! The controller keeps no cluster state of its own. Everything it knows
//! lives in the [`DirectoryStore`]; the other fields are collaborators.

use std::sync::Arc;

use uuid::Uuid;
use vzmgr_protocol::Transport;

use crate::crypto::EncryptionProvider;
use crate::directory::DirectoryStore;
use crate::error::{CoreError, Result};
use crate::resolver::AddressResolver;
use crate::updater::UpdateTrigger;

/// Shared state for agent and management handlers.
pub struct ControllerState {
    pub directory: Arc<dyn DirectoryStore>,
    pub encryptor: Arc<dyn EncryptionProvider>,
    pub resolver: Arc<dyn AddressResolver>,
    pub updater: Arc<dyn UpdateTrigger>,
    /// Bus for outbound events; `None` disables event publishing.
    pub bus: Option<Arc<dyn Transport>>,
}

impl ControllerState {
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        encryptor: Arc<dyn EncryptionProvider>,
        resolver: Arc<dyn AddressResolver>,
        updater: Arc<dyn UpdateTrigger>,
    ) -> Self {
        Self {
            directory,
            encryptor,
            resolver,
            updater,
            bus: None,
        }
    }

    /// Publish outbound events on `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn Transport>) -> Self {
        self.bus = Some(bus);
        self
    }
}

impl std::fmt::Debug for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerState")
            .field("directory", &"...")
            .field("bus", &self.bus.as_ref().map(|_| "..."))
            .finish_non_exhaustive()
    }
}

/// Identity of the caller of a management operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub org_id: Uuid,
    pub user_id: Uuid,
}

impl AuthContext {
    pub fn new(org_id: Uuid, user_id: Uuid) -> Self {
        Self { org_id, user_id }
    }
}

/// Parse a caller-supplied id; the nil UUID counts as malformed.
pub fn parse_id(field: &str, raw: &str) -> Result<Uuid> {
    match Uuid::parse_str(raw.trim()) {
        Ok(id) if !id.is_nil() => Ok(id),
        Ok(_) => Err(CoreError::invalid_argument(field, "must not be the nil UUID")),
        Err(e) => Err(CoreError::invalid_argument(
            field,
            format!("'{raw}' is not a UUID: {e}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id("cluster_id", &id.to_string()).unwrap(), id);
        assert_eq!(parse_id("cluster_id", &format!(" {id} ")).unwrap(), id);

        for raw in ["", "abc", "00000000-0000-0000-0000-000000000000"] {
            let err = parse_id("cluster_id", raw).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_ARGUMENT", "{raw:?}");
        }
    }
}
