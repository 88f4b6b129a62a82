// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, state::AppState};

/// Quote-safe filename for `Content-Disposition`.
fn disposition(file_name: &str) -> HeaderValue {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Download a file, decrypted with its owner's data key.
#[utoipa::path(
    get,
    path = "/v1/files/{file_id}",
    params(
        ("file_id" = u64, Path, description = "Identifier of the stored file")
    ),
    tag = "Files",
    responses(
        (status = 200, description = "Decrypted file content", content_type = "application/octet-stream", body = Vec<u8>),
        (status = 404, body = crate::error::ErrorBody),
        (status = 500, description = "Stored content failed authentication", body = crate::error::ErrorBody)
    )
)]
pub async fn download_file(
    Path(file_id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let file = state.coordinator.open_file(file_id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.metadata.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        disposition(&file.metadata.file_name),
    );

    Ok((StatusCode::OK, headers, Body::from(file.content)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CreateRecordRequest, FailureReason, Upload};
    use crate::storage::NewUser;
    use axum::body::to_bytes;

    #[test]
    fn disposition_escapes_quotes_and_non_ascii() {
        assert_eq!(
            disposition("report \"final\".pdf"),
            "attachment; filename=\"report _final_.pdf\""
        );
        assert_eq!(disposition("résumé.txt"), "attachment; filename=\"r_sum_.txt\"");
    }

    #[tokio::test]
    async fn download_returns_plaintext_with_headers() {
        let state = AppState::ephemeral().unwrap();
        let created = state
            .coordinator
            .create_record(CreateRecordRequest {
                user: NewUser {
                    username: "dana".into(),
                    first_name: "Dana".into(),
                    last_name: "Scully".into(),
                    address: "FBI HQ".into(),
                },
                upload: Some(Upload {
                    file_name: "case.json".into(),
                    mime_type: "application/json".into(),
                    content: br#"{"x":1}"#.to_vec(),
                }),
            })
            .await
            .unwrap();

        let response = download_file(Path(created.file_id.unwrap()), State(state))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"case.json\""
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"x":1}"#);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = download_file(Path(42), State(AppState::ephemeral().unwrap()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.reason, Some(FailureReason::NotFound));
    }
}
