// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process key service for tests and `dev` builds.
//!
//! Wraps data keys under an ephemeral master key generated at construction.
//! Ciphertexts look like `local:{key_name}:v1:{base64}` and cannot be
//! unwrapped by any other instance. Outages and sealing can be simulated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use zeroize::Zeroizing;

use super::{DataKey, KeyCiphertext, KeyManagementClient, KmsError, KmsResult, SealStatus};
use crate::crypto::{EnvelopeEncryptor, PlaintextKey};

pub struct LocalKms {
    master: PlaintextKey,
    encryptor: EnvelopeEncryptor,
    sealed: AtomicBool,
    unavailable: AtomicBool,
    minted: AtomicU64,
}

impl Default for LocalKms {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalKms {
    pub fn new() -> Self {
        Self {
            master: PlaintextKey::generate(),
            encryptor: EnvelopeEncryptor::new(),
            sealed: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            minted: AtomicU64::new(0),
        }
    }

    /// Simulate a sealed service.
    pub fn set_sealed(&self, sealed: bool) {
        self.sealed.store(sealed, Ordering::SeqCst);
    }

    /// Simulate an unreachable service.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of data keys minted so far.
    pub fn minted(&self) -> u64 {
        self.minted.load(Ordering::SeqCst)
    }

    fn check_ready(&self) -> KmsResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KmsError::Unavailable("local key service offline".into()));
        }
        if self.sealed.load(Ordering::SeqCst) {
            return Err(KmsError::Sealed);
        }
        Ok(())
    }

    fn prefix(key_name: &str) -> String {
        format!("local:{key_name}:v1:")
    }
}

#[async_trait]
impl KeyManagementClient for LocalKms {
    async fn mint_data_key(&self, key_name: &str) -> KmsResult<DataKey> {
        self.check_ready()?;

        let plaintext = PlaintextKey::generate();
        let wrapped = self
            .encryptor
            .encrypt(&self.master, plaintext.as_bytes())
            .map_err(|e| KmsError::Unavailable(e.to_string()))?;
        let ciphertext = format!("{}{}", Self::prefix(key_name), Base64::encode_string(&wrapped));

        self.minted.fetch_add(1, Ordering::SeqCst);
        Ok(DataKey {
            plaintext,
            ciphertext: KeyCiphertext::new(ciphertext.into_bytes()),
        })
    }

    async fn unwrap_data_key(
        &self,
        key_name: &str,
        ciphertext: &KeyCiphertext,
    ) -> KmsResult<PlaintextKey> {
        self.check_ready()?;

        let text = std::str::from_utf8(ciphertext.as_bytes())
            .map_err(|_| KmsError::Unavailable("key ciphertext is not local text".into()))?;
        let encoded = text
            .strip_prefix(&Self::prefix(key_name))
            .ok_or_else(|| KmsError::Unavailable(format!("ciphertext not wrapped under {key_name}")))?;
        let wrapped = Base64::decode_vec(encoded)
            .map_err(|_| KmsError::Unavailable("key ciphertext is not valid base64".into()))?;

        let bytes = Zeroizing::new(
            self.encryptor
                .decrypt(&self.master, &wrapped)
                .map_err(|_| KmsError::Unavailable("key ciphertext failed to unwrap".into()))?,
        );
        PlaintextKey::from_slice(&bytes).map_err(|e| KmsError::Unavailable(e.to_string()))
    }

    async fn seal_status(&self) -> KmsResult<SealStatus> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KmsError::Unavailable("local key service offline".into()));
        }
        Ok(SealStatus {
            sealed: self.sealed.load(Ordering::SeqCst),
            initialized: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn minted_key_unwraps_to_same_plaintext() {
        let kms = LocalKms::new();
        let key = kms.mint_data_key("my_app_key").await.unwrap();

        let unwrapped = kms.unwrap_data_key("my_app_key", &key.ciphertext).await.unwrap();
        assert_eq!(unwrapped.as_bytes(), key.plaintext.as_bytes());
        assert_eq!(kms.minted(), 1);
    }

    #[tokio::test]
    async fn every_mint_is_fresh() {
        let kms = LocalKms::new();
        let a = kms.mint_data_key("my_app_key").await.unwrap();
        let b = kms.mint_data_key("my_app_key").await.unwrap();

        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.plaintext.as_bytes(), b.plaintext.as_bytes());
    }

    #[tokio::test]
    async fn other_key_name_cannot_unwrap() {
        let kms = LocalKms::new();
        let key = kms.mint_data_key("my_app_key").await.unwrap();

        let err = kms.unwrap_data_key("other_key", &key.ciphertext).await.unwrap_err();
        assert!(matches!(err, KmsError::Unavailable(_)));
    }

    #[tokio::test]
    async fn simulated_failures() {
        let kms = LocalKms::new();

        kms.set_sealed(true);
        assert_eq!(kms.mint_data_key("k").await.unwrap_err(), KmsError::Sealed);
        assert!(kms.seal_status().await.unwrap().sealed);

        kms.set_sealed(false);
        kms.set_unavailable(true);
        assert!(matches!(
            kms.mint_data_key("k").await.unwrap_err(),
            KmsError::Unavailable(_)
        ));
        assert_eq!(kms.minted(), 0);
    }
}
