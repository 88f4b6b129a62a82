// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Management
//!
//! Data keys are minted by an external transit key service. The service
//! returns each key twice: a plaintext form for immediate use and a
//! ciphertext form wrapped under a master key only the service holds.
//!
//! ## Handling Rules
//!
//! - Only [`KeyCiphertext`] is ever persisted.
//! - [`PlaintextKey`] is zeroized on drop and never logged or serialized.
//! - Every request mints a fresh key; nothing is cached across requests.
//! - Failures are reported, never retried here.
//!
//! ## Backends
//!
//! - [`transit::TransitClient`] - Vault-compatible transit engine over HTTPS
//! - [`local::LocalKms`] - in-process master key (tests and `dev` builds only)

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::PlaintextKey;

#[cfg(any(test, feature = "dev"))]
pub mod local;
pub mod transit;

#[cfg(any(test, feature = "dev"))]
pub use local::LocalKms;
pub use transit::TransitClient;

/// Master key name used by this service.
pub const DEFAULT_KEY_NAME: &str = "my_app_key";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KmsError {
    /// Endpoint unreachable, returned an error status, or sent a malformed body.
    #[error("key service unavailable: {0}")]
    Unavailable(String),

    /// The service is up but sealed and refuses cryptographic operations.
    #[error("key service is sealed")]
    Sealed,
}

pub type KmsResult<T> = Result<T, KmsError>;

/// KMS-wrapped form of a data key. Opaque; safe to persist.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCiphertext(Vec<u8>);

impl KeyCiphertext {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for KeyCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyCiphertext({} bytes)", self.0.len())
    }
}

/// A freshly minted data key in both forms.
///
/// Destructure it at the call site so the plaintext half can be dropped
/// as soon as encryption is done.
#[derive(Debug)]
pub struct DataKey {
    pub plaintext: PlaintextKey,
    pub ciphertext: KeyCiphertext,
}

/// Seal state reported by the key service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    pub initialized: bool,
}

/// Capability interface over the transit key service.
#[async_trait]
pub trait KeyManagementClient: Send + Sync {
    /// Mint a brand-new data key wrapped under `key_name`.
    async fn mint_data_key(&self, key_name: &str) -> KmsResult<DataKey>;

    /// Ask the service to unwrap a previously minted key.
    async fn unwrap_data_key(
        &self,
        key_name: &str,
        ciphertext: &KeyCiphertext,
    ) -> KmsResult<PlaintextKey>;

    /// Report whether the service is sealed.
    async fn seal_status(&self) -> KmsResult<SealStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ciphertext_debug_hides_contents() {
        let ct = KeyCiphertext::new(b"vault:v1:abcdef".to_vec());
        assert_eq!(format!("{ct:?}"), "KeyCiphertext(15 bytes)");
    }

    #[test]
    fn data_key_debug_never_prints_plaintext() {
        let key = DataKey {
            plaintext: PlaintextKey::from_slice(&[0x41; 32]).unwrap(),
            ciphertext: KeyCiphertext::new(b"vault:v1:xyz".to_vec()),
        };
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("AAAA"));
        assert!(!printed.contains("65, 65"));
    }
}
