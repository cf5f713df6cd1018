// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster status and its transition table.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use vzmgr_protocol::messages::AgentStatus;

use crate::error::CoreError;

/// Stored status of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClusterStatus {
    /// Provisioned but no agent connected (or agent gone).
    #[default]
    Disconnected,
    /// Agent connected and reported a reachable address.
    Connected,
    Healthy,
    Unhealthy,
    /// Install or upgrade in flight.
    Updating,
}

/// Input that moves a cluster between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Agent (re)connected; `live` when it reported an address.
    Connected { live: bool },
    /// Heartbeat received.
    Heartbeat {
        declared: AgentStatus,
        has_address: bool,
        bootstrap: bool,
    },
}

impl ClusterStatus {
    pub const ALL: [ClusterStatus; 5] = [
        ClusterStatus::Disconnected,
        ClusterStatus::Connected,
        ClusterStatus::Healthy,
        ClusterStatus::Unhealthy,
        ClusterStatus::Updating,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Disconnected => "DISCONNECTED",
            ClusterStatus::Connected => "CONNECTED",
            ClusterStatus::Healthy => "HEALTHY",
            ClusterStatus::Unhealthy => "UNHEALTHY",
            ClusterStatus::Updating => "UPDATING",
        }
    }

    /// Whether a record in this status may be claimed by a new connection.
    pub fn is_claimable(self) -> bool {
        self == ClusterStatus::Disconnected
    }

    /// Next status after `event`.
    ///
    /// Heartbeats always carry fresh information, so the result of a
    /// heartbeat does not depend on the current status. No event moves a
    /// cluster back to `Disconnected`.
    pub fn transition(self, event: StatusEvent) -> ClusterStatus {
        use ClusterStatus::*;

        match (self, event) {
            (_, StatusEvent::Connected { live: true }) => Connected,
            (_, StatusEvent::Connected { live: false }) => Unhealthy,

            // Bootstrap short-circuits: the install is in flight.
            (
                _,
                StatusEvent::Heartbeat {
                    bootstrap: true, ..
                },
            ) => Updating,
            // No reachable address trumps everything the agent declares.
            (
                _,
                StatusEvent::Heartbeat {
                    has_address: false,
                    ..
                },
            ) => Unhealthy,
            (_, StatusEvent::Heartbeat { declared, .. }) => match declared {
                AgentStatus::Unknown | AgentStatus::Healthy | AgentStatus::Connected => Healthy,
                AgentStatus::Updating => Updating,
                AgentStatus::Unhealthy | AgentStatus::Disconnected => Unhealthy,
            },
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ClusterStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClusterStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::internal(format!("unknown cluster status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(declared: AgentStatus, has_address: bool, bootstrap: bool) -> StatusEvent {
        StatusEvent::Heartbeat {
            declared,
            has_address,
            bootstrap,
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ClusterStatus::ALL {
            assert_eq!(status.as_str().parse::<ClusterStatus>().unwrap(), status);
        }
        assert!("healthy".parse::<ClusterStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_as_stored_name() {
        assert_eq!(
            serde_json::to_value(ClusterStatus::Updating).unwrap(),
            serde_json::json!("UPDATING")
        );
    }

    #[test]
    fn test_connect_transitions() {
        for status in ClusterStatus::ALL {
            assert_eq!(
                status.transition(StatusEvent::Connected { live: true }),
                ClusterStatus::Connected
            );
            assert_eq!(
                status.transition(StatusEvent::Connected { live: false }),
                ClusterStatus::Unhealthy
            );
        }
    }

    #[test]
    fn test_heartbeat_without_address_is_unhealthy() {
        for status in ClusterStatus::ALL {
            for declared in [
                AgentStatus::Unknown,
                AgentStatus::Healthy,
                AgentStatus::Updating,
            ] {
                assert_eq!(
                    status.transition(heartbeat(declared, false, false)),
                    ClusterStatus::Unhealthy
                );
            }
        }
    }

    #[test]
    fn test_bootstrap_heartbeat_is_updating() {
        for status in ClusterStatus::ALL {
            for has_address in [true, false] {
                assert_eq!(
                    status.transition(heartbeat(AgentStatus::Healthy, has_address, true)),
                    ClusterStatus::Updating
                );
            }
        }
    }

    #[test]
    fn test_declared_status_mapping() {
        let cases = [
            (AgentStatus::Unknown, ClusterStatus::Healthy),
            (AgentStatus::Healthy, ClusterStatus::Healthy),
            (AgentStatus::Connected, ClusterStatus::Healthy),
            (AgentStatus::Updating, ClusterStatus::Updating),
            (AgentStatus::Unhealthy, ClusterStatus::Unhealthy),
            (AgentStatus::Disconnected, ClusterStatus::Unhealthy),
        ];
        for (declared, expected) in cases {
            assert_eq!(
                ClusterStatus::Connected.transition(heartbeat(declared, true, false)),
                expected,
                "{declared:?}"
            );
        }
    }

    #[test]
    fn test_heartbeat_never_disconnects() {
        for status in ClusterStatus::ALL {
            for declared in [AgentStatus::Disconnected, AgentStatus::Unknown] {
                assert_ne!(
                    status.transition(heartbeat(declared, true, false)),
                    ClusterStatus::Disconnected
                );
            }
            assert_ne!(
                status.transition(StatusEvent::Connected { live: false }),
                ClusterStatus::Disconnected
            );
        }
    }
}
