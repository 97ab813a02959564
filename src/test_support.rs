//! Shared fixtures for router-level tests.

use axum::Router;
use axum::body::Body as AxumBody;
use axum::http::{Request, header};
use axum::response::Response;
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::{DEFAULT_UPLOAD_MAX_SIZE, PUBLIC_UPLOAD_PREFIX};
use crate::records::RecordStore;
use crate::storage::Storage;

const BOUNDARY: &str = "daily-upload-test-boundary";

pub struct TestApp {
    _temp: TempDir,
    pub storage: Arc<Storage>,
    pub records: Arc<RecordStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_records(RecordStore::in_memory())
    }

    pub fn with_records(records: RecordStore) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(Storage::new(
            temp.path().join("uploads"),
            PUBLIC_UPLOAD_PREFIX,
        ));
        Self {
            _temp: temp,
            storage,
            records: Arc::new(records),
        }
    }

    pub fn router(&self) -> Router {
        crate::build_router(
            self.storage.clone(),
            self.records.clone(),
            DEFAULT_UPLOAD_MAX_SIZE,
        )
    }

    /// Entries directly under the upload root; 0 when the root was never created.
    pub fn root_entries(&self) -> usize {
        std::fs::read_dir(self.storage.root_path())
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    pub fn user_files(&self, user: &str) -> usize {
        std::fs::read_dir(self.storage.root_path().join(user))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

pub struct FilePart<'a> {
    field: &'a str,
    file_name: &'a str,
    content_type: &'a str,
    data: &'a [u8],
}

impl<'a> FilePart<'a> {
    pub fn new(field: &'a str, file_name: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            field,
            file_name,
            content_type,
            data,
        }
    }
}

/// Builds a `POST /daily_upload` multipart request.
pub fn multipart_request(user: Option<&str>, files: &[FilePart<'_>]) -> Request<AxumBody> {
    let mut body = Vec::new();
    if let Some(user) = user {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"user\"\r\n\r\n{user}\r\n"
            )
            .as_bytes(),
        );
    }
    for file in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.field, file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/daily_upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(AxumBody::from(body))
        .expect("multipart request")
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
