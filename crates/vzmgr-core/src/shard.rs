// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shard routing over the cluster-ID keyspace.
//!
//! The shard of a cluster is the last byte of its UUID, i.e. the final two
//! hex digits of the canonical string. Controller replicas each own an
//! inclusive range of shards and only process envelopes for their clusters.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Shard of a cluster ID.
pub fn shard_of(cluster_id: &Uuid) -> u8 {
    cluster_id.as_bytes()[15]
}

/// Inclusive range of shards `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardRange {
    from: u8,
    to: u8,
}

impl ShardRange {
    /// Every shard (`00`-`ff`).
    pub const FULL: ShardRange = ShardRange { from: 0x00, to: 0xff };

    /// Build a range from two-hex-digit bounds.
    ///
    /// Bounds are case-insensitive. Non-hex input, wrong length or
    /// `from > to` is rejected.
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        let from_shard = parse_bound("from_shard_id", from)?;
        let to_shard = parse_bound("to_shard_id", to)?;
        if from_shard > to_shard {
            return Err(CoreError::invalid_argument(
                "from_shard_id",
                format!("{from} is greater than to_shard_id {to}"),
            ));
        }
        Ok(Self {
            from: from_shard,
            to: to_shard,
        })
    }

    pub fn contains(&self, cluster_id: &Uuid) -> bool {
        (self.from..=self.to).contains(&shard_of(cluster_id))
    }

    /// Lower bound as two lowercase hex digits.
    pub fn from_bound(&self) -> String {
        format!("{:02x}", self.from)
    }

    /// Upper bound as two lowercase hex digits.
    pub fn to_bound(&self) -> String {
        format!("{:02x}", self.to)
    }
}

impl Default for ShardRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for ShardRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}-{:02x}", self.from, self.to)
    }
}

/// Parses `from-to`, e.g. `00-7f`.
impl FromStr for ShardRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (from, to) = s
            .split_once('-')
            .ok_or_else(|| CoreError::invalid_argument("shard_range", "expected <from>-<to>"))?;
        Self::parse(from.trim(), to.trim())
    }
}

fn parse_bound(field: &str, bound: &str) -> Result<u8> {
    if bound.len() != 2 {
        return Err(CoreError::invalid_argument(
            field,
            format!("'{bound}' must be exactly two hex digits"),
        ));
    }
    let bytes = hex::decode(bound)
        .map_err(|_| CoreError::invalid_argument(field, format!("'{bound}' is not hex")))?;
    Ok(bytes[0])
}
