// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::coordinator::{CoordinatorError, FailureReason};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub reason: Option<FailureReason>,
    /// Set when a user row survived a partial failure.
    pub user_id: Option<u64>,
}

/// JSON body of every failure response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            reason: None,
            user_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// A malformed submission, tagged like a coordinator validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        let mut err = Self::bad_request(message);
        err.reason = Some(FailureReason::ValidationFailed);
        err
    }
}

pub fn status_for(reason: FailureReason) -> StatusCode {
    match reason {
        FailureReason::ValidationFailed => StatusCode::BAD_REQUEST,
        FailureReason::NotFound => StatusCode::NOT_FOUND,
        FailureReason::ConstraintViolation => StatusCode::UNPROCESSABLE_ENTITY,
        FailureReason::KeyServiceUnavailable => StatusCode::BAD_GATEWAY,
        FailureReason::KeyServiceSealed | FailureReason::StorageUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        FailureReason::EncryptionFailed | FailureReason::DecryptionFailed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        let reason = e.reason();
        Self {
            status: status_for(reason),
            message: e.to_string(),
            reason: Some(reason),
            user_id: e.surviving_user(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            reason: self.reason,
            user_id: self.user_id,
        });
        (self.status, body).into_response()
    }
}
