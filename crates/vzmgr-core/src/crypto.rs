// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! At-rest protection of cluster signing keys.
//!
//! Keys are salted, then encrypted with AES-256-GCM. Stored format:
//! `base64(nonce[12] || ciphertext || tag[16])` of `salt || key`.

// generic-array::from_slice is deprecated upstream; aes-gcm 0.10 still takes it
#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use base64::prelude::*;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

use crate::error::{CoreError, Result};

/// Length of the random salt prepended to a signing key before encryption.
pub const SALT_LENGTH: usize = 10;

const NONCE_LENGTH: usize = 12;

/// Symmetric encryption of secrets stored in the directory.
pub trait EncryptionProvider: Send + Sync {
    /// Encrypt; ciphertext differs on every call.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// AES-256-GCM provider with a random nonce per message.
#[derive(Clone)]
pub struct AesGcmEncryptor {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryptor").finish_non_exhaustive()
    }
}

impl AesGcmEncryptor {
    /// Build from a 32-byte key given as 64 hex chars or base64.
    pub fn from_key(key: &str) -> Result<Self> {
        let key = key.trim();

        let key_bytes = if key.len() == 64 {
            hex::decode(key).map_err(|e| {
                CoreError::invalid_argument("database_key", format!("invalid hex: {e}"))
            })?
        } else if key.len() == 44 || key.len() == 43 {
            BASE64_STANDARD.decode(key).map_err(|e| {
                CoreError::invalid_argument("database_key", format!("invalid base64: {e}"))
            })?
        } else {
            return Err(CoreError::invalid_argument(
                "database_key",
                format!(
                    "expected 64 hex chars or 44 base64 chars, got {}",
                    key.len()
                ),
            ));
        };

        if key_bytes.len() != 32 {
            return Err(CoreError::invalid_argument(
                "database_key",
                format!("expected 32 bytes, got {}", key_bytes.len()),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CoreError::internal(format!("failed to create cipher: {e}")))?;
        Ok(Self { cipher })
    }
}

impl EncryptionProvider for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CoreError::internal(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64_STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let sealed = BASE64_STANDARD
            .decode(ciphertext)
            .map_err(|e| CoreError::internal(format!("stored secret is not base64: {e}")))?;
        if sealed.len() < NONCE_LENGTH {
            return Err(CoreError::internal("stored secret is truncated"));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CoreError::internal(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| CoreError::internal(format!("stored secret is not UTF-8: {e}")))
    }
}

/// Salt and encrypt a signing key for storage.
pub fn seal_signing_key(provider: &dyn EncryptionProvider, key: &str) -> Result<String> {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect();
    provider.encrypt(&format!("{salt}{key}"))
}

/// Decrypt a stored signing key and strip its salt.
pub fn open_signing_key(provider: &dyn EncryptionProvider, sealed: &str) -> Result<String> {
    let salted = provider.decrypt(sealed)?;
    salted
        .get(SALT_LENGTH..)
        .map(str::to_string)
        .ok_or_else(|| CoreError::internal("stored signing key is shorter than its salt"))
}
