//! 统一的 API 错误类型与转换，所有错误均以 JSON 返回。

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::io::ErrorKind;
use tracing::warn;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    Store {
        context: &'static str,
        details: String,
    },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

fn error_response(status: StatusCode, error: &str, details: Option<&str>) -> Response {
    (status, Json(ErrorBody { error, details })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, &msg, None),
            ApiError::NotFound(msg) => error_response(StatusCode::NOT_FOUND, &msg, None),
            ApiError::Internal(msg) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg, None)
            }
            ApiError::Store { context, details } => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, context, Some(&details))
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest("invalid path".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

/// multipart 解析失败（含超出大小限制）一律视为客户端错误。
impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        warn!(error = %error.body_text(), "multipart stream error");
        ApiError::BadRequest(error.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        warn!(error = %rejection.body_text(), "multipart request rejected");
        ApiError::BadRequest(rejection.body_text())
    }
}
