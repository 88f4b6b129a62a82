// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    coordinator::{CreateRecordRequest, Upload},
    error::ApiError,
    models::{CreateRecordForm, CreateRecordResponse, UserListingResponse, UserResponse},
    state::AppState,
    storage::NewUser,
};

const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: usize = 100;
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";
const FALLBACK_FILE_NAME: &str = "upload";

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Maximum rows to return (default 10, capped at 100).
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LookupQuery {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

fn multipart_error(e: MultipartError) -> ApiError {
    tracing::warn!(error = %e, "Rejected multipart body");
    ApiError::new(e.status(), e.body_text())
}

/// Read the creation form. Missing text fields are left empty for the
/// coordinator to reject.
async fn read_form(mut multipart: Multipart) -> Result<CreateRecordRequest, ApiError> {
    let mut user = NewUser::default();
    let mut upload = None;
    let mut seen_file = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "username" => user.username = field.text().await.map_err(multipart_error)?,
            "firstname" => user.first_name = field.text().await.map_err(multipart_error)?,
            "lastname" => user.last_name = field.text().await.map_err(multipart_error)?,
            "address" => user.address = field.text().await.map_err(multipart_error)?,
            "userfile" => {
                if seen_file {
                    return Err(ApiError::validation("only one userfile may be uploaded"));
                }
                seen_file = true;

                let file_name = field
                    .file_name()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
                let mime_type = field
                    .content_type()
                    .unwrap_or(FALLBACK_MIME_TYPE)
                    .to_string();
                let content = field.bytes().await.map_err(multipart_error)?;

                // Browsers send an empty part when no file was chosen.
                if file_name.is_none() && content.is_empty() {
                    continue;
                }

                upload = Some(Upload {
                    file_name: file_name.unwrap_or_else(|| FALLBACK_FILE_NAME.to_string()),
                    mime_type,
                    content: content.to_vec(),
                });
            }
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(CreateRecordRequest { user, upload })
}

/// Create a user record, optionally with one encrypted file.
///
/// A fresh data key is minted for every call. If the user is stored but the
/// file is not, the error body carries the surviving `user_id`.
#[utoipa::path(
    post,
    path = "/v1/records",
    request_body(content = CreateRecordForm, content_type = "multipart/form-data"),
    tag = "Records",
    responses(
        (status = 201, body = CreateRecordResponse),
        (status = 400, description = "Missing or malformed fields", body = crate::error::ErrorBody),
        (status = 422, description = "Rejected by storage constraints", body = crate::error::ErrorBody),
        (status = 502, description = "Key service unreachable", body = crate::error::ErrorBody),
        (status = 503, description = "Key service sealed or storage down", body = crate::error::ErrorBody)
    )
)]
pub async fn create_record(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreateRecordResponse>), ApiError> {
    let request = read_form(multipart).await?;
    let created = state.coordinator.create_record(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRecordResponse {
            success: true,
            username: created.username,
            user_id: created.user_id,
            file_id: created.file_id,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/records",
    params(ListQuery),
    tag = "Records",
    responses((status = 200, body = [UserListingResponse]))
)]
pub async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<UserListingResponse>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let rows = state.coordinator.list_users(limit)?;
    Ok(Json(rows.into_iter().map(UserListingResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/v1/records/lookup",
    params(LookupQuery),
    tag = "Records",
    responses(
        (status = 200, body = UserResponse),
        (status = 404, body = crate::error::ErrorBody)
    )
)]
pub async fn lookup_user(
    State(state): State<AppState>,
    Query(params): Query<LookupQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .coordinator
        .find_user(&params.username, &params.first_name, &params.last_name)?;
    let files = state.coordinator.files_for_user(user.id)?;
    Ok(Json(UserResponse::new(user, files)))
}
