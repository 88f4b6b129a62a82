// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! once at startup and passed down explicitly.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `1234` |
//! | `DATA_DIR` | Directory holding `records.redb` | `./data` |
//! | `VAULT_ADDR` | Transit KMS address | `http://127.0.0.1:8200` |
//! | `VAULT_TOKEN` | Token for transit calls | Required for `transit` |
//! | `TRANSIT_KEY_NAME` | Master key wrapping every data key | `my_app_key` |
//! | `KMS_TIMEOUT_SECS` | Per-request KMS timeout | `10` |
//! | `KMS_BACKEND` | `transit`, or `local` in `dev` builds | `transit` |
//! | `MAX_UPLOAD_BYTES` | Request body cap for uploads | `33554432` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; both set enables HTTPS | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::kms::DEFAULT_KEY_NAME;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Environment variable name for the database directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";
pub const TRANSIT_KEY_NAME_ENV: &str = "TRANSIT_KEY_NAME";
pub const KMS_TIMEOUT_ENV: &str = "KMS_TIMEOUT_SECS";
pub const KMS_BACKEND_ENV: &str = "KMS_BACKEND";
pub const MAX_UPLOAD_BYTES_ENV: &str = "MAX_UPLOAD_BYTES";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 1234;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";
const DEFAULT_KMS_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Database file name under `DATA_DIR`.
pub const DATABASE_FILE: &str = "records.redb";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together")]
    PartialTls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsBackend {
    Transit,
    /// In-process master key; only honoured in `dev` builds.
    Local,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TransitSettings {
    pub address: String,
    pub token: String,
    pub timeout: Duration,
}

impl fmt::Debug for TransitSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitSettings")
            .field("address", &self.address)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub kms_backend: KmsBackend,
    /// Absent only when `kms_backend` is `Local`.
    pub transit: Option<TransitSettings>,
    pub key_name: String,
    pub max_upload_bytes: usize,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(&get, PORT_ENV, DEFAULT_PORT)?;
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: HOST_ENV,
                value: host.clone(),
            })?;

        let kms_backend = match get(KMS_BACKEND_ENV).as_deref() {
            None | Some("transit") => KmsBackend::Transit,
            Some("local") => KmsBackend::Local,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: KMS_BACKEND_ENV,
                    value: other.to_string(),
                })
            }
        };

        let transit = match kms_backend {
            KmsBackend::Transit => Some(TransitSettings {
                address: get(VAULT_ADDR_ENV).unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_string()),
                token: get(VAULT_TOKEN_ENV).ok_or(ConfigError::Missing(VAULT_TOKEN_ENV))?,
                timeout: Duration::from_secs(parse_or(
                    &get,
                    KMS_TIMEOUT_ENV,
                    DEFAULT_KMS_TIMEOUT_SECS,
                )?),
            }),
            KmsBackend::Local => None,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialTls),
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            bind_addr,
            data_dir: get(DATA_DIR_ENV)
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
                .into(),
            kms_backend,
            transit,
            key_name: get(TRANSIT_KEY_NAME_ENV).unwrap_or_else(|| DEFAULT_KEY_NAME.to_string()),
            max_upload_bytes: parse_or(&get, MAX_UPLOAD_BYTES_ENV, DEFAULT_MAX_UPLOAD_BYTES)?,
            tls,
            log_format,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
