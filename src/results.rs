//! 按记录 ID 获取生成的配文或下载结果图片。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::error::ApiError;
use crate::records::{RecordStore, UploadRecord};
use crate::storage::{Storage, is_valid_username};
use crate::upload::MSG_INVALID_USERNAME;

pub const MSG_MISSING_PARAMS: &str = "Missing id or user parameter";
pub const MSG_ENTRY_NOT_FOUND: &str = "Entry not found";
pub const MSG_CAPTION_PENDING: &str = "Caption not available yet";
pub const MSG_RESULT_PENDING: &str = "Result image not available yet";
pub const MSG_FILE_NOT_FOUND: &str = "File not found";

#[derive(Debug, Deserialize)]
pub(crate) struct RecordQuery {
    id: Option<String>,
    user: Option<String>,
}

impl RecordQuery {
    fn required(&self) -> Result<(&str, &str), ApiError> {
        match (present(&self.id), present(&self.user)) {
            (Some(_), Some(user)) if !is_valid_username(user) => {
                Err(ApiError::BadRequest(MSG_INVALID_USERNAME.into()))
            }
            (Some(id), Some(user)) => Ok((id, user)),
            _ => Err(ApiError::BadRequest(MSG_MISSING_PARAMS.into())),
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Serialize)]
pub(crate) struct CaptionResponse {
    caption: String,
}

async fn load_record(
    records: &RecordStore,
    user: &str,
    id: &str,
    context: &'static str,
) -> Result<UploadRecord, ApiError> {
    match records.find_by_id(user, id).await {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(ApiError::NotFound(MSG_ENTRY_NOT_FOUND.into())),
        Err(err) => {
            error!(user, id, error = %err, "record lookup failed");
            Err(ApiError::Store {
                context,
                details: err.to_string(),
            })
        }
    }
}

/// 返回记录的配文，尚未生成时返回 404。
pub async fn get_caption(
    Query(query): Query<RecordQuery>,
    Extension(records): Extension<Arc<RecordStore>>,
) -> Result<JsonResponse<CaptionResponse>, ApiError> {
    let (id, user) = query.required()?;
    let record = load_record(&records, user, id, "Failed to fetch caption").await?;
    let caption = record
        .caption
        .filter(|caption| !caption.is_empty())
        .ok_or_else(|| ApiError::NotFound(MSG_CAPTION_PENDING.into()))?;
    info!(user, id, "caption served");
    Ok(JsonResponse(CaptionResponse { caption }))
}

/// 以附件形式下载结果图片。
pub async fn download_result(
    Query(query): Query<RecordQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(records): Extension<Arc<RecordStore>>,
) -> Result<Response, ApiError> {
    let (id, user) = query.required()?;
    let record = load_record(&records, user, id, "Failed to fetch result image").await?;
    let public_path = record
        .result_image_path
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ApiError::NotFound(MSG_RESULT_PENDING.into()))?;

    let target = storage
        .resolve_public(&public_path)
        .await
        .map_err(|_| ApiError::NotFound(MSG_FILE_NOT_FOUND.into()))?;
    let metadata = match fs::metadata(&target).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(ApiError::NotFound(MSG_FILE_NOT_FOUND.into())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ApiError::NotFound(MSG_FILE_NOT_FOUND.into()));
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };
    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "result".to_string());
    let mime = mime_guess::from_path(&target).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
            .map_err(|_| ApiError::Internal("failed to build response headers".into()))?,
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("failed to build response headers".into()))?,
        );
    }

    info!(user, id, path = public_path, size = metadata.len(), "result download");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
