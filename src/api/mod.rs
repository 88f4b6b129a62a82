// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    coordinator::FailureReason,
    error::ErrorBody,
    models::{
        CreateRecordForm, CreateRecordResponse, FileSummary, UserListingResponse, UserResponse,
    },
    state::AppState,
};

pub mod files;
pub mod health;
pub mod records;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/records",
            post(records::create_record).get(records::list_records),
        )
        .route("/records/lookup", get(records::lookup_user))
        .route("/files/{file_id}", get(files::download_file))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        records::create_record,
        records::list_records,
        records::lookup_user,
        files::download_file,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            CreateRecordForm,
            CreateRecordResponse,
            UserListingResponse,
            UserResponse,
            FileSummary,
            ErrorBody,
            FailureReason,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Records", description = "User records with envelope-encrypted files"),
        (name = "Files", description = "Decrypted file download"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
