use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::store::StoreError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt_id: Option<String>,
}

impl ErrorResponse {
    fn plain(status: StatusCode, detail: String) -> Self {
        Self { status: status.as_u16(), detail, code: None, attempt_id: None }
    }
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    /// Conflicts carry a stable `code` so the sync client can tell an
    /// already-submitted attempt apart from a lost start race.
    Conflict {
        code: &'static str,
        detail: String,
        attempt_id: Option<String>,
    },
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ExamNotFound => ApiError::NotFound("Exam not found".to_string()),
            StoreError::AttemptNotFound => ApiError::NotFound("Attempt not found".to_string()),
            StoreError::AccessDenied => {
                ApiError::Forbidden("You do not have access to this exam")
            }
            StoreError::NotOwner => {
                ApiError::Forbidden("You can only access your own attempts")
            }
            StoreError::AlreadyActive { attempt_id } => ApiError::Conflict {
                code: "already_active",
                detail: "You already have an active attempt for this exam".to_string(),
                attempt_id: Some(attempt_id),
            },
            StoreError::AlreadySubmitted { attempt_id } => ApiError::Conflict {
                code: "already_submitted",
                detail: "This attempt has already been submitted".to_string(),
                attempt_id: Some(attempt_id),
            },
            StoreError::NotInProgress => ApiError::Conflict {
                code: "not_in_progress",
                detail: "This attempt is no longer in progress".to_string(),
                attempt_id: None,
            },
            StoreError::StillInProgress => ApiError::Conflict {
                code: "still_in_progress",
                detail: "Results are available after submission".to_string(),
                attempt_id: None,
            },
            StoreError::VersionConflict { current } => ApiError::Conflict {
                code: "version_conflict",
                detail: format!("Stale write rejected, attempt is at version {current}"),
                attempt_id: None,
            },
            StoreError::Validation(message) => ApiError::BadRequest(message),
            StoreError::Answers(err) => ApiError::internal(err, "Failed to decode stored answers"),
            StoreError::Serialization(err) => {
                ApiError::internal(err, "Failed to encode answer payload")
            }
            StoreError::Database(err) => ApiError::internal(err, "Database error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let status = StatusCode::UNAUTHORIZED;
                let mut response =
                    (status, Json(ErrorResponse::plain(status, message.to_string())))
                        .into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => {
                let status = StatusCode::FORBIDDEN;
                (status, Json(ErrorResponse::plain(status, message.to_string()))).into_response()
            }
            ApiError::BadRequest(message) => {
                let status = StatusCode::BAD_REQUEST;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
            ApiError::NotFound(message) => {
                let status = StatusCode::NOT_FOUND;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
            ApiError::Conflict { code, detail, attempt_id } => {
                let status = StatusCode::CONFLICT;
                (
                    status,
                    Json(ErrorResponse {
                        status: status.as_u16(),
                        detail,
                        code: Some(code),
                        attempt_id,
                    }),
                )
                    .into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
        }
    }
}
