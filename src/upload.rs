//! 每日正反面图片上传：读取表单、校验、暂存、写记录、提交。

use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use chrono::Local;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::naming::{ImageSide, UploadStamp};
use crate::records::{NewRecord, RecordStore};
use crate::staging::{StagedFile, commit_all, discard_all};
use crate::storage::{Storage, StorageError};

const ALLOWED_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "gif"];
const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/gif"];

pub const MSG_USERNAME_REQUIRED: &str = "Username is required";
pub const MSG_INVALID_USERNAME: &str = "Invalid username";
pub const MSG_INVALID_TYPE: &str = "Only image files (jpeg, jpg, png, gif) are allowed!";
pub const MSG_NO_FILES: &str = "No files uploaded or invalid file format";
pub const MSG_UNEXPECTED_FIELD: &str = "Unexpected field";

/// 已读入内存的单个图片分片。
#[derive(Debug)]
pub(crate) struct ImagePart {
    file_name: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

impl ImagePart {
    /// 扩展名与声明的 MIME 类型都在白名单内时返回小写扩展名。
    fn allowed_extension(&self) -> Option<String> {
        let extension = Path::new(&self.file_name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        let content_type = normalize_content_type(self.content_type.as_deref()?);
        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return None;
        }
        Some(extension)
    }
}

fn normalize_content_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_ascii_lowercase()
}

#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    user: Option<String>,
    front: Option<ImagePart>,
    back: Option<ImagePart>,
}

impl UploadForm {
    fn slot(&mut self, side: ImageSide) -> &mut Option<ImagePart> {
        match side {
            ImageSide::Front => &mut self.front,
            ImageSide::Back => &mut self.back,
        }
    }
}

/// 读取完整表单；文件字段每个最多一个，其它文件字段一律拒绝。
async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        let Some(file_name) = file_name else {
            let text = field.text().await?;
            if name == "user" {
                form.user = Some(text);
            }
            continue;
        };

        let side = ImageSide::from_field_name(&name)
            .ok_or_else(|| ApiError::BadRequest(MSG_UNEXPECTED_FIELD.into()))?;
        if form.slot(side).is_some() {
            return Err(ApiError::BadRequest(MSG_UNEXPECTED_FIELD.into()));
        }
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await?.to_vec();
        debug!(field = name, file_name, bytes = data.len(), "read upload part");
        *form.slot(side) = Some(ImagePart {
            file_name,
            content_type,
            data,
        });
    }
    Ok(form)
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadedFiles {
    front: Option<String>,
    back: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    id: String,
    message: &'static str,
    files: UploadedFiles,
    date: String,
    time: String,
}

/// 接收正反面图片，保存到用户目录并创建上传记录。
pub async fn daily_upload(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(records): Extension<Arc<RecordStore>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let form = read_form(multipart?).await?;

    let username = form
        .user
        .as_deref()
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .ok_or_else(|| ApiError::BadRequest(MSG_USERNAME_REQUIRED.into()))?
        .to_string();

    let mut accepted = Vec::new();
    for (side, part) in [(ImageSide::Front, form.front), (ImageSide::Back, form.back)] {
        let Some(part) = part else {
            continue;
        };
        let Some(extension) = part.allowed_extension() else {
            warn!(
                user = username,
                field = side.field_name(),
                file_name = part.file_name,
                content_type = part.content_type.as_deref().unwrap_or(""),
                "rejected upload file type"
            );
            return Err(ApiError::BadRequest(MSG_INVALID_TYPE.into()));
        };
        accepted.push((side, extension, part.data));
    }
    if accepted.is_empty() {
        return Err(ApiError::BadRequest(MSG_NO_FILES.into()));
    }

    let user_dir = storage.ensure_user_dir(&username).await.map_err(|err| match err {
        StorageError::InvalidPath => ApiError::BadRequest(MSG_INVALID_USERNAME.into()),
        other => other.into(),
    })?;

    let captured_at = Local::now();
    let stamp = UploadStamp::generate(&captured_at);
    let mut fields = NewRecord {
        upload_date: captured_at.format("%Y-%m-%d").to_string(),
        upload_time: captured_at.format("%H:%M:%S").to_string(),
        ..NewRecord::default()
    };

    let mut staged = Vec::with_capacity(accepted.len());
    for (side, extension, data) in accepted {
        let file_name = stamp.file_name(side, &extension);
        match StagedFile::write(&user_dir.join(&file_name), &data).await {
            Ok(file) => staged.push(file),
            Err(err) => {
                discard_all(staged).await;
                return Err(err.into());
            }
        }
        let public = storage.public_path(&username, &file_name);
        match side {
            ImageSide::Front => fields.front_image_path = Some(public),
            ImageSide::Back => fields.back_image_path = Some(public),
        }
    }

    let record = match records.create_record(&username, fields).await {
        Ok(record) => record,
        Err(err) => {
            error!(user = username, error = %err, "failed to save upload record");
            discard_all(staged).await;
            return Err(ApiError::Store {
                context: "Failed to save entry to database",
                details: err.to_string(),
            });
        }
    };
    let id = record.id.map(|id| id.to_hex()).unwrap_or_default();

    if let Err(err) = commit_all(staged).await {
        error!(
            user = username,
            id,
            error = ?err,
            "upload record references files that were not committed"
        );
        return Err(ApiError::Internal(format!(
            "Failed to store uploaded files for entry {id}"
        )));
    }

    info!(
        user = username,
        id,
        token = stamp.token(),
        front = record.front_image_path.as_deref().unwrap_or(""),
        back = record.back_image_path.as_deref().unwrap_or(""),
        "upload stored"
    );
    Ok(JsonResponse(UploadResponse {
        id,
        message: "Images uploaded and entry created successfully!",
        files: UploadedFiles {
            front: record.front_image_path,
            back: record.back_image_path,
        },
        date: record.upload_date,
        time: record.upload_time,
    }))
}
