// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Short-lived tokens for talking to a cluster directly.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Audience of cluster tokens.
pub const CLUSTER_TOKEN_AUDIENCE: &str = "vizier";

/// Scope granted by cluster tokens.
pub const CLUSTER_SCOPE: &str = "cluster";

/// Issuer (and subject) of cluster tokens.
pub const TOKEN_ISSUER: &str = "vzmgr";

/// How long a cluster token stays valid, in minutes.
pub const TOKEN_VALIDITY_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterClaims {
    pub aud: String,
    pub exp: u64,
    pub iat: u64,
    pub iss: String,
    pub sub: String,
    pub scopes: String,
    /// Cluster the token was minted for.
    pub cluster_id: Uuid,
}

/// Sign an HS256 cluster token with the cluster's own signing key.
pub fn sign_cluster_token(signing_key: &str, cluster_id: Uuid) -> Result<String> {
    let now = Utc::now();
    let claims = ClusterClaims {
        aud: CLUSTER_TOKEN_AUDIENCE.to_string(),
        exp: (now + Duration::minutes(TOKEN_VALIDITY_MINUTES)).timestamp() as u64,
        iat: now.timestamp() as u64,
        iss: TOKEN_ISSUER.to_string(),
        sub: TOKEN_ISSUER.to_string(),
        scopes: CLUSTER_SCOPE.to_string(),
        cluster_id,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key.as_bytes()),
    )
    .map_err(|e| CoreError::internal(format!("failed to sign cluster token: {e}")))
}

/// Verify a cluster token against a signing key.
pub fn verify_cluster_token(signing_key: &str, token: &str) -> Result<ClusterClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[CLUSTER_TOKEN_AUDIENCE]);
    validation.set_issuer(&[TOKEN_ISSUER]);

    decode::<ClusterClaims>(
        token,
        &DecodingKey::from_secret(signing_key.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| CoreError::permission_denied(format!("invalid cluster token: {e}")))
}
