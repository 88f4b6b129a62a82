// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope encryption of file contents.
//!
//! File bytes are sealed with AES-256-GCM under a data key minted by the KMS.
//! The plaintext data key lives in a [`PlaintextKey`], which is zeroized on
//! drop, cannot be cloned, and prints as `[REDACTED]`.
//!
//! ## Ciphertext Layout
//!
//! ```text
//! | nonce (12 bytes) | ciphertext (len(plaintext)) | tag (16 bytes) |
//! ```
//!
//! The nonce is drawn from the OS RNG on every call, so the output is
//! self-contained and two encryptions of the same bytes never match.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 data key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: ciphertext is malformed or was tampered with")]
    DecryptionFailed,

    #[error("data key must be {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Plaintext data key.
///
/// Only ever held for the duration of one encryption or decryption.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PlaintextKey([u8; KEY_SIZE]);

impl PlaintextKey {
    /// Copy key bytes out of a decoded KMS response.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Generate a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PlaintextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextKey([REDACTED])")
    }
}

/// AES-256-GCM sealing of file contents under a caller-supplied data key.
///
/// Stateless: the key is borrowed for the call and never stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeEncryptor;

impl EnvelopeEncryptor {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt `raw` and return `nonce || ciphertext || tag`.
    pub fn encrypt(&self, key: &PlaintextKey, raw: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::EncryptionFailed)?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), raw)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Recover the bytes sealed by [`EnvelopeEncryptor::encrypt`].
    ///
    /// Any malformed input or tag mismatch is a hard `DecryptionFailed`.
    pub fn decrypt(&self, key: &PlaintextKey, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::DecryptionFailed)?;
        let (nonce, body) = sealed.split_at(NONCE_SIZE);

        cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
