// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. Response types derive
//! `Serialize` and `ToSchema`; they are built from storage records and
//! never carry key material (the wrapped key stays server-side too).
//!
//! ## Model Categories
//!
//! - **Records**: user creation and listing
//! - **Files**: metadata of uploaded files

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::{FileMetadata, UserListing, UserRecord};

// =============================================================================
// Record Models
// =============================================================================

/// Multipart body of `POST /v1/records`.
///
/// Only used for the OpenAPI document; the handler reads the parts itself.
#[allow(dead_code)]
#[derive(Debug, ToSchema)]
pub struct CreateRecordForm {
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub address: String,
    /// Optional attachment, encrypted before it is stored.
    #[schema(value_type = Option<String>, format = Binary)]
    pub userfile: Option<Vec<u8>>,
}

/// Outcome of a successful creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CreateRecordResponse {
    pub success: bool,
    pub username: String,
    pub user_id: u64,
    /// Present when a file was uploaded with the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,
}

/// One row of the user listing.
///
/// Users appear once per attached file; users without files are absent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserListingResponse {
    pub user_id: u64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub file_name: String,
}

impl From<UserListing> for UserListingResponse {
    fn from(row: UserListing) -> Self {
        Self {
            user_id: row.user_id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            address: row.address,
            file_name: row.file_name,
        }
    }
}

/// A user found by identity lookup, with their files.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserResponse {
    pub id: u64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<FileSummary>,
}

impl UserResponse {
    pub fn new(user: UserRecord, files: Vec<FileMetadata>) -> Self {
        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            address: user.address,
            created_at: user.created_at,
            files: files.into_iter().map(FileSummary::from).collect(),
        }
    }
}

// =============================================================================
// File Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct FileSummary {
    pub id: u64,
    pub file_name: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<FileMetadata> for FileSummary {
    fn from(meta: FileMetadata) -> Self {
        Self {
            id: meta.id,
            file_name: meta.file_name,
            mime_type: meta.mime_type,
            created_at: meta.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::KeyCiphertext;

    #[test]
    fn user_response_omits_key_ciphertext() {
        let user = UserRecord {
            id: 3,
            username: "alice".into(),
            first_name: "Alice".into(),
            last_name: "Liddell".into(),
            address: "1 Rabbit Hole".into(),
            key_ciphertext: KeyCiphertext::new(b"vault:v1:wrapped".to_vec()),
            created_at: Utc::now(),
        };
        let files = vec![FileMetadata {
            id: 9,
            user_id: 3,
            mime_type: "text/plain".into(),
            file_name: "notes.txt".into(),
            created_at: Utc::now(),
        }];

        let json = serde_json::to_string(&UserResponse::new(user, files)).unwrap();
        assert!(!json.contains("vault:v1"));
        assert!(json.contains("\"file_name\":\"notes.txt\""));
    }

    #[test]
    fn response_without_file_skips_file_id() {
        let body = CreateRecordResponse {
            success: true,
            username: "bob".into(),
            user_id: 1,
            file_id: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"success":true,"username":"bob","user_id":1}"#
        );
    }
}
