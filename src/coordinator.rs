// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Record Coordinator
//!
//! Orchestrates "create a user, optionally with one uploaded file":
//!
//! ```text
//! Start → KeyMinted → UserPersisted ─┬→ FileEncrypted → FilePersisted ─┬→ Done
//!                                    └→ NoFileSupplied ────────────────┘
//!   (any state) → Failed(reason)
//! ```
//!
//! ## Invariants
//!
//! - A fresh data key is minted for every request; nothing is cached.
//! - Only the key ciphertext is handed to storage.
//! - The plaintext key is dropped (and zeroized) before the call returns,
//!   whether it succeeds or fails.
//! - A failure after the user row is written does not roll it back. The
//!   error is [`CoordinatorError::FileStage`] and names the surviving user.
//!
//! Dependencies are injected as trait objects, so tests can swap in the
//! local KMS, an in-memory database, or a failing store.

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::crypto::{CryptoError, EnvelopeEncryptor, PlaintextKey};
use crate::kms::{DataKey, KeyManagementClient, KmsError, SealStatus};
use crate::storage::{
    FileId, FileMetadata, FileStore, NewUser, RecordStore, StorageError, UserId, UserListing,
    UserRecord,
};

/// Failure tags surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum FailureReason {
    ValidationFailed,
    KeyServiceUnavailable,
    KeyServiceSealed,
    StorageUnavailable,
    ConstraintViolation,
    EncryptionFailed,
    DecryptionFailed,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    KeyService(#[from] KmsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The user row exists but its file could not be encrypted or stored.
    #[error("user {username} (id {user_id}) was created but the file was not stored: {source}")]
    FileStage {
        user_id: UserId,
        username: String,
        #[source]
        source: Box<CoordinatorError>,
    },
}

impl CoordinatorError {
    pub fn reason(&self) -> FailureReason {
        match self {
            CoordinatorError::Validation(_) => FailureReason::ValidationFailed,
            CoordinatorError::KeyService(KmsError::Sealed) => FailureReason::KeyServiceSealed,
            CoordinatorError::KeyService(KmsError::Unavailable(_)) => {
                FailureReason::KeyServiceUnavailable
            }
            CoordinatorError::Storage(StorageError::Unavailable(_)) => {
                FailureReason::StorageUnavailable
            }
            CoordinatorError::Storage(StorageError::ConstraintViolation(_)) => {
                FailureReason::ConstraintViolation
            }
            CoordinatorError::Storage(StorageError::NotFound(_)) => FailureReason::NotFound,
            CoordinatorError::Crypto(CryptoError::DecryptionFailed) => {
                FailureReason::DecryptionFailed
            }
            CoordinatorError::Crypto(_) => FailureReason::EncryptionFailed,
            CoordinatorError::FileStage { source, .. } => source.reason(),
        }
    }

    /// Id of a user row left in place by a partial failure.
    pub fn surviving_user(&self) -> Option<UserId> {
        match self {
            CoordinatorError::FileStage { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// States of one creation request, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    Start,
    KeyMinted,
    UserPersisted,
    FileEncrypted,
    FilePersisted,
    NoFileSupplied,
    Done,
    Failed,
}

/// The single optional attachment of a creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRecordRequest {
    pub user: NewUser,
    pub upload: Option<Upload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub user_id: UserId,
    pub username: String,
    pub file_id: Option<FileId>,
}

/// A stored file with its content decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub metadata: FileMetadata,
    pub content: Vec<u8>,
}

fn trace_state(state: CreationState) {
    tracing::debug!(state = ?state, "Creation state reached");
}

/// Run a store call on the blocking pool; redb commits fsync and serialize
/// writers, so they must not stall runtime workers.
async fn blocking<T, F>(op: F) -> CoordinatorResult<T>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => Ok(result?),
        Err(e) => Err(StorageError::Unavailable(format!("storage task failed: {e}")).into()),
    }
}

fn validate(user: &NewUser) -> CoordinatorResult<()> {
    let missing: Vec<&str> = [
        ("username", &user.username),
        ("first name", &user.first_name),
        ("last name", &user.last_name),
        ("address", &user.address),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoordinatorError::Validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}

pub struct RecordCoordinator {
    kms: Arc<dyn KeyManagementClient>,
    records: Arc<dyn RecordStore>,
    files: Arc<dyn FileStore>,
    encryptor: EnvelopeEncryptor,
    key_name: String,
}

impl RecordCoordinator {
    pub fn new(
        kms: Arc<dyn KeyManagementClient>,
        records: Arc<dyn RecordStore>,
        files: Arc<dyn FileStore>,
        key_name: impl Into<String>,
    ) -> Self {
        Self {
            kms,
            records,
            files,
            encryptor: EnvelopeEncryptor::new(),
            key_name: key_name.into(),
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Create a user and, if supplied, store its file encrypted.
    pub async fn create_record(&self, request: CreateRecordRequest) -> CoordinatorResult<CreatedRecord> {
        let span = tracing::info_span!(
            "create_record",
            request_id = %Uuid::new_v4(),
            username = %request.user.username,
        );

        async move {
            let result = self.run_create(request).await;
            match &result {
                Ok(created) => tracing::info!(
                    user_id = created.user_id,
                    file_id = ?created.file_id,
                    "Record created"
                ),
                Err(e) => {
                    trace_state(CreationState::Failed);
                    tracing::warn!(
                        reason = ?e.reason(),
                        surviving_user = ?e.surviving_user(),
                        error = %e,
                        "Record creation failed"
                    );
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_create(&self, request: CreateRecordRequest) -> CoordinatorResult<CreatedRecord> {
        trace_state(CreationState::Start);
        validate(&request.user)?;

        let DataKey {
            plaintext,
            ciphertext,
        } = self.kms.mint_data_key(&self.key_name).await?;
        trace_state(CreationState::KeyMinted);

        let records = self.records.clone();
        let fields = request.user.clone();
        let user_id = match blocking(move || records.create_user(&fields, &ciphertext)).await {
            Ok(id) => id,
            Err(e) => {
                drop(plaintext);
                return Err(e);
            }
        };
        trace_state(CreationState::UserPersisted);

        let Some(upload) = request.upload else {
            drop(plaintext);
            trace_state(CreationState::NoFileSupplied);
            trace_state(CreationState::Done);
            return Ok(CreatedRecord {
                user_id,
                username: request.user.username,
                file_id: None,
            });
        };

        let stored = self.store_upload(user_id, &upload, &plaintext).await;
        drop(plaintext);

        let file_id = stored.map_err(|source| CoordinatorError::FileStage {
            user_id,
            username: request.user.username.clone(),
            source: Box::new(source),
        })?;
        trace_state(CreationState::Done);

        Ok(CreatedRecord {
            user_id,
            username: request.user.username,
            file_id: Some(file_id),
        })
    }

    async fn store_upload(
        &self,
        user_id: UserId,
        upload: &Upload,
        key: &PlaintextKey,
    ) -> CoordinatorResult<FileId> {
        let sealed = self.encryptor.encrypt(key, &upload.content)?;
        trace_state(CreationState::FileEncrypted);

        let files = self.files.clone();
        let mime_type = upload.mime_type.clone();
        let file_name = upload.file_name.clone();
        let file_id =
            blocking(move || files.create_file(user_id, &mime_type, &file_name, &sealed)).await?;
        trace_state(CreationState::FilePersisted);

        tracing::debug!(
            file_id,
            file_name = %upload.file_name,
            mime_type = %upload.mime_type,
            bytes = upload.content.len(),
            "Encrypted file stored"
        );
        Ok(file_id)
    }

    /// Load a file and decrypt it with its owner's unwrapped data key.
    pub async fn open_file(&self, file_id: FileId) -> CoordinatorResult<OpenedFile> {
        let files = self.files.clone();
        let file = blocking(move || files.get_file(file_id)).await?;
        let records = self.records.clone();
        let owner_id = file.metadata.user_id;
        let owner = blocking(move || records.get_user(owner_id)).await?;

        let key = self
            .kms
            .unwrap_data_key(&self.key_name, &owner.key_ciphertext)
            .await?;
        let content = self.encryptor.decrypt(&key, &file.encrypted_content);
        drop(key);

        match content {
            Ok(content) => Ok(OpenedFile {
                metadata: file.metadata,
                content,
            }),
            Err(e) => {
                tracing::error!(file_id, user_id = owner.id, "Stored file failed authentication");
                Err(e.into())
            }
        }
    }

    pub fn list_users(&self, limit: usize) -> CoordinatorResult<Vec<UserListing>> {
        Ok(self.records.list_users(limit)?)
    }

    pub fn find_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> CoordinatorResult<UserRecord> {
        Ok(self
            .records
            .find_user_by_identity(username, first_name, last_name)?)
    }

    pub fn files_for_user(&self, user_id: UserId) -> CoordinatorResult<Vec<FileMetadata>> {
        Ok(self.files.files_for_user(user_id)?)
    }

    pub async fn key_service_status(&self) -> Result<SealStatus, KmsError> {
        self.kms.seal_status().await
    }

    pub fn storage_status(&self) -> Result<(), StorageError> {
        self.records.health_check()
    }
}
