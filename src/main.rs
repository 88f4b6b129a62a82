// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{process::ExitCode, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tracing_subscriber::EnvFilter;

use envelope_records::{
    api::router,
    config::{AppConfig, ConfigError, KmsBackend, LogFormat, VAULT_TOKEN_ENV},
    coordinator::RecordCoordinator,
    kms::{transit::TransitClient, KeyManagementClient, KmsError},
    state::AppState,
    storage::{RecordDatabase, StorageError},
};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("key service client: {0}")]
    Kms(#[from] KmsError),

    #[error("record database: {0}")]
    Storage(#[from] StorageError),

    #[cfg(not(feature = "dev"))]
    #[error("the local key service requires a build with the `dev` feature")]
    LocalKmsDisabled,

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn build_kms(config: &AppConfig) -> Result<Arc<dyn KeyManagementClient>, StartupError> {
    match (config.kms_backend, &config.transit) {
        (KmsBackend::Transit, Some(transit)) => Ok(Arc::new(TransitClient::new(
            &transit.address,
            transit.token.clone(),
            transit.timeout,
        )?)),
        (KmsBackend::Transit, None) => Err(ConfigError::Missing(VAULT_TOKEN_ENV).into()),
        #[cfg(feature = "dev")]
        (KmsBackend::Local, _) => {
            tracing::warn!("Using the in-process key service; wrapped keys die with the process");
            Ok(Arc::new(envelope_records::kms::LocalKms::new()))
        }
        #[cfg(not(feature = "dev"))]
        (KmsBackend::Local, _) => Err(StartupError::LocalKmsDisabled),
    }
}

async fn log_seal_status(kms: &dyn KeyManagementClient) {
    match kms.seal_status().await {
        Ok(status) => tracing::info!(
            sealed = status.sealed,
            initialized = status.initialized,
            "Key service seal status"
        ),
        Err(e) => tracing::warn!(error = %e, "Key service seal status unavailable"),
    }
}

async fn shutdown_signal(handle: Handle<std::net::SocketAddr>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    let kms = build_kms(&config)?;
    log_seal_status(kms.as_ref()).await;

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(RecordDatabase::open(&config.database_path())?);
    tracing::info!(path = %config.database_path().display(), "Record database opened");

    let coordinator = RecordCoordinator::new(kms, db.clone(), db, config.key_name.clone());
    let app = router(AppState::new(coordinator, config.max_upload_bytes));

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    let addr = config.bind_addr;
    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| StartupError::Tls(e.to_string()))?;
            tracing::info!(%addr, key_name = %config.key_name, "Listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::info!(%addr, key_name = %config.key_name, "Listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Install the ring crypto provider for rustls before any TLS operation.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
