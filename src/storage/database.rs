// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded record database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized UserRow
//! - `files`: file_id → serialized FileRow (metadata only)
//! - `file_contents`: file_id → encrypted content bytes
//! - `user_files`: (user_id, file_id) → () ownership index
//!
//! Ids are assigned as `last id + 1` inside the write transaction, so they
//! start at 1 and increase monotonically.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{
    backends::InMemoryBackend, Database, ReadableDatabase, ReadableTable, TableDefinition,
};
use serde::{Deserialize, Serialize};

use super::{
    FileId, FileMetadata, FileRecord, FileStore, NewUser, RecordStore, StorageError,
    StorageResult, UserId, UserListing, UserRecord,
};
use crate::kms::KeyCiphertext;

// =============================================================================
// Table Definitions
// =============================================================================

const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");

const FILE_CONTENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("file_contents");

/// Index: (user_id, file_id) → (). Range-scanned per user.
const USER_FILES: TableDefinition<(u64, u64), ()> = TableDefinition::new("user_files");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum DbError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("file {0} has metadata but no stored content")]
    MissingContent(FileId),

    #[error("{0}")]
    Constraint(String),

    #[error("{0}")]
    NotFound(String),
}

type DbResult<T> = Result<T, DbError>;

impl From<DbError> for StorageError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Constraint(msg) => StorageError::ConstraintViolation(msg),
            DbError::NotFound(msg) => StorageError::NotFound(msg),
            other => StorageError::Unavailable(other.to_string()),
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct UserRow {
    username: String,
    first_name: String,
    last_name: String,
    address: String,
    key_ciphertext: KeyCiphertext,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_record(self, id: UserId) -> UserRecord {
        UserRecord {
            id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            address: self.address,
            key_ciphertext: self.key_ciphertext,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileRow {
    user_id: UserId,
    mime_type: String,
    file_name: String,
    created_at: DateTime<Utc>,
}

impl FileRow {
    fn into_metadata(self, id: FileId) -> FileMetadata {
        FileMetadata {
            id,
            user_id: self.user_id,
            mime_type: self.mime_type,
            file_name: self.file_name,
            created_at: self.created_at,
        }
    }
}

fn next_id(table: &impl ReadableTable<u64, &'static [u8]>) -> DbResult<u64> {
    let last = table.last()?.map(|(key, _)| key.value());
    Ok(last.map_or(1, |id| id + 1))
}

// =============================================================================
// RecordDatabase
// =============================================================================

/// Embedded ACID store for users and their encrypted files.
pub struct RecordDatabase {
    db: Database,
}

impl RecordDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self::open_inner(path)?)
    }

    fn open_inner(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::bootstrap(Database::create(path)?)
    }

    /// Volatile database, used by tests and local development.
    pub fn in_memory() -> StorageResult<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(DbError::from)?;
        Ok(Self::bootstrap(db)?)
    }

    /// Pre-create all tables so later read transactions don't fail.
    fn bootstrap(db: Database) -> DbResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(FILES)?;
            let _ = write_txn.open_table(FILE_CONTENTS)?;
            let _ = write_txn.open_table(USER_FILES)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn probe(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        let _ = read_txn.open_table(FILES)?;
        Ok(())
    }

    fn insert_user(&self, row: &UserRow) -> DbResult<UserId> {
        let json = serde_json::to_vec(row)?;

        let write_txn = self.db.begin_write()?;
        let id = {
            let mut users = write_txn.open_table(USERS)?;
            let id = next_id(&users)?;
            users.insert(id, json.as_slice())?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }

    fn insert_file(&self, row: &FileRow, content: &[u8]) -> DbResult<FileId> {
        let json = serde_json::to_vec(row)?;

        let write_txn = self.db.begin_write()?;
        let id = {
            let users = write_txn.open_table(USERS)?;
            if users.get(row.user_id)?.is_none() {
                return Err(DbError::Constraint(format!(
                    "user {} does not exist",
                    row.user_id
                )));
            }

            let mut files = write_txn.open_table(FILES)?;
            let id = next_id(&files)?;
            files.insert(id, json.as_slice())?;

            let mut contents = write_txn.open_table(FILE_CONTENTS)?;
            contents.insert(id, content)?;

            let mut index = write_txn.open_table(USER_FILES)?;
            index.insert((row.user_id, id), ())?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }

    fn read_user(&self, user_id: UserId) -> DbResult<UserRecord> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(USERS)?;
        let row: UserRow = match users.get(user_id)? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => return Err(DbError::NotFound(format!("user {user_id}"))),
        };
        Ok(row.into_record(user_id))
    }

    fn scan_identity(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> DbResult<UserRecord> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(USERS)?;

        for entry in users.iter()? {
            let (key, value) = entry?;
            let row: UserRow = serde_json::from_slice(value.value())?;
            if row.username == username && row.first_name == first_name && row.last_name == last_name
            {
                return Ok(row.into_record(key.value()));
            }
        }

        Err(DbError::NotFound(format!("user {username}")))
    }

    fn join_listing(&self, limit: usize) -> DbResult<Vec<UserListing>> {
        let read_txn = self.db.begin_read()?;
        let files = read_txn.open_table(FILES)?;
        let users = read_txn.open_table(USERS)?;

        let mut listing = Vec::with_capacity(limit.min(64));
        if limit == 0 {
            return Ok(listing);
        }

        for entry in files.iter()? {
            let (_, value) = entry?;
            let file: FileRow = serde_json::from_slice(value.value())?;

            let Some(user_value) = users.get(file.user_id)? else {
                tracing::warn!(user_id = file.user_id, "File row references a missing user");
                continue;
            };
            let user: UserRow = serde_json::from_slice(user_value.value())?;

            listing.push(UserListing {
                user_id: file.user_id,
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
                address: user.address,
                file_name: file.file_name,
            });

            if listing.len() >= limit {
                break;
            }
        }

        Ok(listing)
    }

    fn read_file(&self, file_id: FileId) -> DbResult<FileRecord> {
        let read_txn = self.db.begin_read()?;
        let files = read_txn.open_table(FILES)?;
        let contents = read_txn.open_table(FILE_CONTENTS)?;

        let row: FileRow = match files.get(file_id)? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => return Err(DbError::NotFound(format!("file {file_id}"))),
        };
        let encrypted_content = match contents.get(file_id)? {
            Some(value) => value.value().to_vec(),
            None => return Err(DbError::MissingContent(file_id)),
        };

        Ok(FileRecord {
            metadata: row.into_metadata(file_id),
            encrypted_content,
        })
    }

    fn scan_user_files(&self, user_id: UserId) -> DbResult<Vec<FileMetadata>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USER_FILES)?;
        let files = read_txn.open_table(FILES)?;

        let mut result = Vec::new();
        for entry in index.range((user_id, 0)..=(user_id, u64::MAX))? {
            let (key, _) = entry?;
            let (_, file_id) = key.value();
            if let Some(value) = files.get(file_id)? {
                let row: FileRow = serde_json::from_slice(value.value())?;
                result.push(row.into_metadata(file_id));
            }
        }
        Ok(result)
    }
}

fn require(field: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        Err(StorageError::ConstraintViolation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

impl RecordStore for RecordDatabase {
    fn create_user(&self, fields: &NewUser, key_ciphertext: &KeyCiphertext) -> StorageResult<UserId> {
        require("username", &fields.username)?;
        require("address", &fields.address)?;
        if key_ciphertext.is_empty() {
            return Err(StorageError::ConstraintViolation(
                "key ciphertext must not be empty".into(),
            ));
        }

        let row = UserRow {
            username: fields.username.clone(),
            first_name: fields.first_name.clone(),
            last_name: fields.last_name.clone(),
            address: fields.address.clone(),
            key_ciphertext: key_ciphertext.clone(),
            created_at: Utc::now(),
        };
        Ok(self.insert_user(&row)?)
    }

    fn list_users(&self, limit: usize) -> StorageResult<Vec<UserListing>> {
        Ok(self.join_listing(limit)?)
    }

    fn find_user_by_identity(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> StorageResult<UserRecord> {
        Ok(self.scan_identity(username, first_name, last_name)?)
    }

    fn get_user(&self, user_id: UserId) -> StorageResult<UserRecord> {
        Ok(self.read_user(user_id)?)
    }

    /// Verify a read transaction can be opened against the tables.
    fn health_check(&self) -> StorageResult<()> {
        Ok(self.probe()?)
    }
}

impl FileStore for RecordDatabase {
    fn create_file(
        &self,
        user_id: UserId,
        mime_type: &str,
        file_name: &str,
        encrypted_content: &[u8],
    ) -> StorageResult<FileId> {
        let row = FileRow {
            user_id,
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
            created_at: Utc::now(),
        };
        Ok(self.insert_file(&row, encrypted_content)?)
    }

    fn get_file(&self, file_id: FileId) -> StorageResult<FileRecord> {
        Ok(self.read_file(file_id)?)
    }

    fn files_for_user(&self, user_id: UserId) -> StorageResult<Vec<FileMetadata>> {
        Ok(self.scan_user_files(user_id)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> NewUser {
        NewUser {
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "A".to_string(),
            address: "1 Main St".to_string(),
        }
    }

    fn ciphertext(tag: &str) -> KeyCiphertext {
        KeyCiphertext::new(format!("vault:v1:{tag}").into_bytes())
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let db = RecordDatabase::in_memory().unwrap();
        let first = db.create_user(&alice(), &ciphertext("a")).unwrap();
        let second = db.create_user(&alice(), &ciphertext("b")).unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[test]
    fn create_and_get_user() {
        let db = RecordDatabase::in_memory().unwrap();
        let id = db.create_user(&alice(), &ciphertext("a")).unwrap();

        let user = db.get_user(id).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.address, "1 Main St");
        assert_eq!(user.key_ciphertext, ciphertext("a"));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let db = RecordDatabase::in_memory().unwrap();

        let mut no_name = alice();
        no_name.username = "  ".to_string();
        assert!(matches!(
            db.create_user(&no_name, &ciphertext("a")),
            Err(StorageError::ConstraintViolation(_))
        ));

        let mut no_address = alice();
        no_address.address.clear();
        assert!(matches!(
            db.create_user(&no_address, &ciphertext("a")),
            Err(StorageError::ConstraintViolation(_))
        ));

        assert!(matches!(
            db.create_user(&alice(), &KeyCiphertext::new(Vec::new())),
            Err(StorageError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn file_requires_existing_user() {
        let db = RecordDatabase::in_memory().unwrap();
        let result = db.create_file(42, "text/plain", "notes.txt", b"sealed");
        assert!(matches!(result, Err(StorageError::ConstraintViolation(_))));
    }

    #[test]
    fn create_and_get_file() {
        let db = RecordDatabase::in_memory().unwrap();
        let user_id = db.create_user(&alice(), &ciphertext("a")).unwrap();
        let file_id = db
            .create_file(user_id, "text/plain", "notes.txt", b"sealed-bytes")
            .unwrap();

        let file = db.get_file(file_id).unwrap();
        assert_eq!(file.metadata.user_id, user_id);
        assert_eq!(file.metadata.mime_type, "text/plain");
        assert_eq!(file.metadata.file_name, "notes.txt");
        assert_eq!(file.encrypted_content, b"sealed-bytes");

        assert!(matches!(db.get_file(99), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn file_without_content_row_is_an_integrity_fault() {
        let db = RecordDatabase::in_memory().unwrap();
        let user_id = db.create_user(&alice(), &ciphertext("a")).unwrap();
        let file_id = db
            .create_file(user_id, "text/plain", "notes.txt", b"sealed-bytes")
            .unwrap();

        let write_txn = db.db.begin_write().unwrap();
        {
            let mut contents = write_txn.open_table(FILE_CONTENTS).unwrap();
            contents.remove(file_id).unwrap();
        }
        write_txn.commit().unwrap();

        match db.get_file(file_id) {
            Err(StorageError::Unavailable(msg)) => assert!(msg.contains("no stored content")),
            other => panic!("expected an integrity error, got {other:?}"),
        }
    }

    #[test]
    fn listing_is_an_inner_join() {
        let db = RecordDatabase::in_memory().unwrap();
        let without_file = db.create_user(&alice(), &ciphertext("a")).unwrap();

        let mut bob = alice();
        bob.username = "bob".to_string();
        let with_file = db.create_user(&bob, &ciphertext("b")).unwrap();
        db.create_file(with_file, "text/plain", "bob.txt", b"x").unwrap();

        let listing = db.list_users(10).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].user_id, with_file);
        assert_eq!(listing[0].file_name, "bob.txt");
        assert!(listing.iter().all(|row| row.user_id != without_file));
    }

    #[test]
    fn listing_repeats_users_per_file_and_respects_limit() {
        let db = RecordDatabase::in_memory().unwrap();
        let user_id = db.create_user(&alice(), &ciphertext("a")).unwrap();
        for i in 0..3 {
            db.create_file(user_id, "text/plain", &format!("f{i}.txt"), b"x")
                .unwrap();
        }

        let all = db.list_users(10).unwrap();
        let names: Vec<_> = all.iter().map(|row| row.file_name.as_str()).collect();
        assert_eq!(names, vec!["f0.txt", "f1.txt", "f2.txt"]);

        assert_eq!(db.list_users(2).unwrap().len(), 2);
        assert!(db.list_users(0).unwrap().is_empty());
    }

    #[test]
    fn find_by_identity_prefers_lowest_id() {
        let db = RecordDatabase::in_memory().unwrap();
        let first = db.create_user(&alice(), &ciphertext("a")).unwrap();
        db.create_user(&alice(), &ciphertext("b")).unwrap();

        let found = db.find_user_by_identity("alice", "Alice", "A").unwrap();
        assert_eq!(found.id, first);

        assert!(matches!(
            db.find_user_by_identity("alice", "Alice", "B"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn files_for_user_uses_ownership_index() {
        let db = RecordDatabase::in_memory().unwrap();
        let a = db.create_user(&alice(), &ciphertext("a")).unwrap();
        let b = db.create_user(&alice(), &ciphertext("b")).unwrap();
        db.create_file(a, "text/plain", "a1", b"x").unwrap();
        db.create_file(b, "text/plain", "b1", b"x").unwrap();
        db.create_file(a, "image/png", "a2", b"x").unwrap();

        let files = db.files_for_user(a).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a1", "a2"]);
        assert!(db.files_for_user(77).unwrap().is_empty());
    }

    #[test]
    fn on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.redb");

        let user_id = {
            let db = RecordDatabase::open(&path).unwrap();
            let id = db.create_user(&alice(), &ciphertext("a")).unwrap();
            db.create_file(id, "text/plain", "notes.txt", b"sealed").unwrap();
            id
        };

        let db = RecordDatabase::open(&path).unwrap();
        db.health_check().unwrap();
        assert_eq!(db.get_user(user_id).unwrap().username, "alice");
        assert_eq!(db.list_users(10).unwrap().len(), 1);
    }
}
