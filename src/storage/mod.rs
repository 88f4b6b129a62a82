// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Record Storage
//!
//! Persists user records and their uploaded files.
//!
//! ## Data Model
//!
//! ```text
//! users                         files
//!   user_id (auto)  <-------------  user_id
//!   username                        file_id (auto)
//!   first_name / last_name          mime_type
//!   address                         file_name
//!   key_ciphertext (KMS-wrapped)    encrypted_content
//! ```
//!
//! A user's `key_ciphertext` is written once at creation and never updated.
//! File contents are stored exactly as produced by the envelope encryptor;
//! this layer never sees plaintext file bytes or plaintext keys.
//!
//! The stores are expressed as capability traits so the coordinator can be
//! exercised against any backend. [`RecordDatabase`] implements both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kms::KeyCiphertext;

pub mod database;

pub use database::RecordDatabase;

pub type UserId = u64;
pub type FileId = u64;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    /// Backend unreachable or failed mid-operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Rejected by a schema-level rule (missing field, dangling reference).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Fields supplied when creating a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
}

/// A persisted user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    /// Wrapped data key protecting every file this user owns.
    pub key_ciphertext: KeyCiphertext,
    pub created_at: DateTime<Utc>,
}

/// File metadata without content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub id: FileId,
    pub user_id: UserId,
    pub mime_type: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted file, content still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub metadata: FileMetadata,
    pub encrypted_content: Vec<u8>,
}

/// One row of the user listing: a user joined with one of their files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserListing {
    pub user_id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub file_name: String,
}

/// User persistence.
pub trait RecordStore: Send + Sync {
    /// Insert a user carrying `key_ciphertext` and return its new id.
    fn create_user(&self, fields: &NewUser, key_ciphertext: &KeyCiphertext) -> StorageResult<UserId>;

    /// Users joined with their files, at most `limit` rows.
    ///
    /// Inner join: a user without files does not appear, a user with two
    /// files appears twice.
    fn list_users(&self, limit: usize) -> StorageResult<Vec<UserListing>>;

    fn find_user_by_identity(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> StorageResult<UserRecord>;

    fn get_user(&self, user_id: UserId) -> StorageResult<UserRecord>;

    /// Cheap probe used by the readiness endpoint.
    fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// File persistence.
pub trait FileStore: Send + Sync {
    /// Insert an encrypted file owned by `user_id` and return its new id.
    fn create_file(
        &self,
        user_id: UserId,
        mime_type: &str,
        file_name: &str,
        encrypted_content: &[u8],
    ) -> StorageResult<FileId>;

    fn get_file(&self, file_id: FileId) -> StorageResult<FileRecord>;

    fn files_for_user(&self, user_id: UserId) -> StorageResult<Vec<FileMetadata>>;
}
