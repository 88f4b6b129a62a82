// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::coordinator::RecordCoordinator;

/// Shared handler state. Built once at startup; no process-wide globals.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RecordCoordinator>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(coordinator: RecordCoordinator, max_upload_bytes: usize) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            max_upload_bytes,
        }
    }
}

#[cfg(any(test, feature = "dev"))]
impl AppState {
    /// Local KMS plus in-memory database; nothing survives the process.
    pub fn ephemeral() -> crate::storage::StorageResult<Self> {
        use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
        use crate::kms::{LocalKms, DEFAULT_KEY_NAME};
        use crate::storage::RecordDatabase;

        let db = Arc::new(RecordDatabase::in_memory()?);
        let coordinator = RecordCoordinator::new(
            Arc::new(LocalKms::new()),
            db.clone(),
            db,
            DEFAULT_KEY_NAME,
        );
        Ok(Self::new(coordinator, DEFAULT_MAX_UPLOAD_BYTES))
    }
}
