// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope Records - user records with envelope-encrypted file uploads
//!
//! Every user gets a data key minted by a transit KMS. Files are encrypted
//! with the plaintext key, which lives only in memory for the duration of
//! one request; the database holds nothing but the KMS-wrapped ciphertext.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `coordinator` - Record creation workflow and file read-back
//! - `crypto` - AES-256-GCM envelope encryption
//! - `kms` - Key management clients (transit, local)
//! - `storage` - Record and file persistence (redb)

pub mod api;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod kms;
pub mod models;
pub mod state;
pub mod storage;
