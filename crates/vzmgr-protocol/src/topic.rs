// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Topic grammar of the message bridge.
//!
//! - cluster to cloud: `v2c.<protocolVersion>.<clusterID>.<kind>`
//! - cloud to cluster: `c2v.<clusterID>.<kind>`
//! - a request on one direction is answered on the other with `<kind>Resp`
//! - bus-wide events use bare names such as [`CLUSTER_CONNECTED_TOPIC`]

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::ProtocolError;

/// Current cluster-to-cloud protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Suffix appended to the kind of a reply topic
pub const RESPONSE_SUFFIX: &str = "Resp";

/// Bus event published when a cluster connects
pub const CLUSTER_CONNECTED_TOPIC: &str = "VizierConnected";

const V2C_PREFIX: &str = "v2c";
const C2V_PREFIX: &str = "c2v";

/// Direction a topic flows in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `v2c.*`: cluster to cloud
    VizierToCloud,
    /// `c2v.*`: cloud to cluster
    CloudToVizier,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::VizierToCloud => V2C_PREFIX,
            Direction::CloudToVizier => C2V_PREFIX,
        }
    }

    fn reverse(self) -> Self {
        match self {
            Direction::VizierToCloud => Direction::CloudToVizier,
            Direction::CloudToVizier => Direction::VizierToCloud,
        }
    }
}

/// A parsed cluster topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub direction: Direction,
    /// Only present on cluster-to-cloud topics
    pub version: Option<u32>,
    pub cluster_id: Uuid,
    pub kind: String,
}

impl Topic {
    /// `v2c.<PROTOCOL_VERSION>.<id>.<kind>`
    pub fn inbound(cluster_id: Uuid, kind: &str) -> Self {
        Self {
            direction: Direction::VizierToCloud,
            version: Some(PROTOCOL_VERSION),
            cluster_id,
            kind: kind.to_string(),
        }
    }

    /// `c2v.<id>.<kind>`
    pub fn outbound(cluster_id: Uuid, kind: &str) -> Self {
        Self {
            direction: Direction::CloudToVizier,
            version: None,
            cluster_id,
            kind: kind.to_string(),
        }
    }

    /// Topic on which a reply to this topic is expected.
    pub fn reply(&self) -> Self {
        let direction = self.direction.reverse();
        Self {
            direction,
            version: match direction {
                Direction::VizierToCloud => Some(PROTOCOL_VERSION),
                Direction::CloudToVizier => None,
            },
            cluster_id: self.cluster_id,
            kind: format!("{}{RESPONSE_SUFFIX}", self.kind),
        }
    }

    pub fn is_reply(&self) -> bool {
        self.kind.ends_with(RESPONSE_SUFFIX)
    }

    /// Subscription pattern covering every cluster-to-cloud topic.
    pub fn inbound_pattern() -> String {
        format!("{V2C_PREFIX}.*.*.*")
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(
                f,
                "{}.{}.{}.{}",
                self.direction.prefix(),
                version,
                self.cluster_id,
                self.kind
            ),
            None => write!(
                f,
                "{}.{}.{}",
                self.direction.prefix(),
                self.cluster_id,
                self.kind
            ),
        }
    }
}

impl FromStr for Topic {
    type Err = ProtocolError;

    fn from_str(topic: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ProtocolError::InvalidTopic {
            topic: topic.to_string(),
            reason,
        };

        let parts: Vec<&str> = topic.split('.').collect();
        let (direction, version, id, kind) = match parts.as_slice() {
            [V2C_PREFIX, version, id, kind] => {
                let version = version
                    .parse::<u32>()
                    .map_err(|_| invalid("protocol version is not a number"))?;
                (Direction::VizierToCloud, Some(version), *id, *kind)
            }
            [C2V_PREFIX, id, kind] => (Direction::CloudToVizier, None, *id, *kind),
            _ => return Err(invalid("expected v2c.<ver>.<id>.<kind> or c2v.<id>.<kind>")),
        };

        let cluster_id = Uuid::parse_str(id).map_err(|_| invalid("cluster id is not a UUID"))?;
        if kind.is_empty() {
            return Err(invalid("empty message kind"));
        }

        Ok(Self {
            direction,
            version,
            cluster_id,
            kind: kind.to_string(),
        })
    }
}

/// Match a topic against a subscription pattern.
///
/// Patterns are dot-separated; `*` matches exactly one token.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut topic_tokens = topic.split('.');
    loop {
        match (pattern_tokens.next(), topic_tokens.next()) {
            (None, None) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            _ => return false,
        }
    }
}
