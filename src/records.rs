//! Per-user upload records.
//!
//! Each username owns one collection. Handles are created lazily on first use
//! and cached by [`RecordStore`], so every request for the same user shares a
//! single handle for the lifetime of the process.

use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::DEFAULT_DATABASE;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Uploaded,
    Processing,
    Completed,
    Failed,
}

/// One upload event. Enrichment fields are filled by an external pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub front_image_path: Option<String>,
    #[serde(default)]
    pub back_image_path: Option<String>,
    #[serde(default)]
    pub front_image_description: Option<String>,
    #[serde(default)]
    pub back_image_description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub result_image_path: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
    pub upload_date: String,
    pub upload_time: String,
}

/// Fields supplied by the upload handler.
#[derive(Clone, Debug, Default)]
pub struct NewRecord {
    pub front_image_path: Option<String>,
    pub back_image_path: Option<String>,
    pub upload_date: String,
    pub upload_time: String,
}

impl NewRecord {
    fn validate(&self) -> Result<(), StoreError> {
        if self.front_image_path.is_none() && self.back_image_path.is_none() {
            return Err(StoreError::InvalidRecord("an image path is required"));
        }
        if self.upload_date.is_empty() || self.upload_time.is_empty() {
            return Err(StoreError::InvalidRecord("upload date and time are required"));
        }
        Ok(())
    }

    fn into_record(self, id: ObjectId) -> UploadRecord {
        UploadRecord {
            id: Some(id),
            status: RecordStatus::Uploaded,
            front_image_path: self.front_image_path,
            back_image_path: self.back_image_path,
            front_image_description: None,
            back_image_description: None,
            prompt: None,
            result_image_path: None,
            caption: None,
            emotion: None,
            upload_date: self.upload_date,
            upload_time: self.upload_time,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    InvalidRecord(&'static str),
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidRecord(msg) => write!(f, "invalid record: {msg}"),
            StoreError::Backend(msg) => f.write_str(msg),
        }
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

enum Backend {
    Mongo(Database),
    Memory,
    #[cfg(test)]
    Unavailable,
}

enum CollectionInner {
    Mongo(Collection<UploadRecord>),
    Memory(RwLock<HashMap<ObjectId, UploadRecord>>),
    #[cfg(test)]
    Unavailable,
}

/// Handle to a single user's collection.
pub struct UserCollection {
    name: String,
    inner: CollectionInner,
}

impl UserCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, record: &UploadRecord) -> Result<(), StoreError> {
        match &self.inner {
            CollectionInner::Mongo(collection) => {
                collection.insert_one(record).await?;
            }
            CollectionInner::Memory(documents) => {
                let id = record
                    .id
                    .ok_or(StoreError::InvalidRecord("record id is required"))?;
                documents.write().await.insert(id, record.clone());
            }
            #[cfg(test)]
            CollectionInner::Unavailable => {
                return Err(StoreError::Backend("record store unavailable".into()));
            }
        }
        Ok(())
    }

    async fn find(&self, id: ObjectId) -> Result<Option<UploadRecord>, StoreError> {
        match &self.inner {
            CollectionInner::Mongo(collection) => Ok(collection.find_one(doc! { "_id": id }).await?),
            CollectionInner::Memory(documents) => Ok(documents.read().await.get(&id).cloned()),
            #[cfg(test)]
            CollectionInner::Unavailable => {
                Err(StoreError::Backend("record store unavailable".into()))
            }
        }
    }
}

/// Owns the backend connection and the username → collection registry.
pub struct RecordStore {
    backend: Backend,
    collections: Mutex<HashMap<String, Arc<UserCollection>>>,
}

impl RecordStore {
    /// Connects to MongoDB. The database comes from the URI path, falling back
    /// to the default name when the URI has none.
    pub async fn connect_mongo(uri: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        info!(database = database.name(), "using mongodb record store");
        Ok(Self::with_backend(Backend::Mongo(database)))
    }

    /// Process-local store; records are lost on restart.
    pub fn in_memory() -> Self {
        Self::with_backend(Backend::Memory)
    }

    /// Store whose every operation fails, as when the database is down.
    #[cfg(test)]
    pub fn unavailable() -> Self {
        Self::with_backend(Backend::Unavailable)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the collection for `username`, creating the handle on first use.
    pub async fn collection(&self, username: &str) -> Arc<UserCollection> {
        let mut collections = self.collections.lock().await;
        collections
            .entry(username.to_string())
            .or_insert_with(|| {
                debug!(user = username, "registering collection");
                let inner = match &self.backend {
                    Backend::Mongo(database) => {
                        CollectionInner::Mongo(database.collection::<UploadRecord>(username))
                    }
                    Backend::Memory => CollectionInner::Memory(RwLock::new(HashMap::new())),
                    #[cfg(test)]
                    Backend::Unavailable => CollectionInner::Unavailable,
                };
                Arc::new(UserCollection {
                    name: username.to_string(),
                    inner,
                })
            })
            .clone()
    }

    pub async fn create_record(
        &self,
        username: &str,
        fields: NewRecord,
    ) -> Result<UploadRecord, StoreError> {
        fields.validate()?;
        let id = ObjectId::new();
        let record = fields.into_record(id);
        let collection = self.collection(username).await;
        collection.insert(&record).await?;
        debug!(collection = collection.name(), id = %id, "record created");
        Ok(record)
    }

    /// Looks up a record by its hex id. Malformed ids are reported as absent.
    pub async fn find_by_id(
        &self,
        username: &str,
        id: &str,
    ) -> Result<Option<UploadRecord>, StoreError> {
        let Ok(object_id) = ObjectId::parse_str(id) else {
            debug!(user = username, id, "malformed record id");
            return Ok(None);
        };
        self.collection(username).await.find(object_id).await
    }

    /// Stores a fully populated record, standing in for the enrichment pipeline.
    #[cfg(test)]
    pub async fn insert_raw(&self, username: &str, record: UploadRecord) -> Result<(), StoreError> {
        self.collection(username).await.insert(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn front_only() -> NewRecord {
        NewRecord {
            front_image_path: Some("/uploads/alice/a-front-1.jpg".into()),
            back_image_path: None,
            upload_date: "2024-03-05".into(),
            upload_time: "07:09:41".into(),
        }
    }

    #[tokio::test]
    async fn create_then_find_returns_same_record() {
        let store = RecordStore::in_memory();
        let created = store
            .create_record("alice", front_only())
            .await
            .expect("create record");
        assert_eq!(created.status, RecordStatus::Uploaded);
        assert!(created.back_image_path.is_none());

        let id = created.id.expect("generated id").to_hex();
        let found = store
            .find_by_id("alice", &id)
            .await
            .expect("lookup")
            .expect("record exists");
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn records_are_scoped_to_their_user() {
        let store = RecordStore::in_memory();
        let created = store
            .create_record("alice", front_only())
            .await
            .expect("create record");
        let id = created.id.expect("generated id").to_hex();

        let found = store.find_by_id("bob", &id).await.expect("lookup");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn collection_handle_is_reused() {
        let store = RecordStore::in_memory();
        let first = store.collection("alice").await;
        let second = store.collection("alice").await;
        let other = store.collection("bob").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.name(), "alice");
    }

    #[tokio::test]
    async fn concurrent_first_use_registers_one_handle() {
        let store = Arc::new(RecordStore::in_memory());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.collection("carol").await }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.expect("join"));
        }
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test]
    async fn unavailable_store_reports_backend_errors() {
        let store = RecordStore::unavailable();
        assert!(matches!(
            store.create_record("alice", front_only()).await,
            Err(StoreError::Backend(_))
        ));
        let id = ObjectId::new().to_hex();
        assert!(matches!(
            store.find_by_id("alice", &id).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn malformed_id_is_not_found() {
        let store = RecordStore::in_memory();
        for id in ["", "not-an-id", "123", "zzzzzzzzzzzzzzzzzzzzzzzz"] {
            let found = store.find_by_id("alice", id).await.expect("lookup");
            assert!(found.is_none(), "{id:?} should not match");
        }
    }

    #[tokio::test]
    async fn create_requires_an_image_and_timestamp() {
        let store = RecordStore::in_memory();
        let no_images = NewRecord {
            front_image_path: None,
            ..front_only()
        };
        assert!(matches!(
            store.create_record("alice", no_images).await,
            Err(StoreError::InvalidRecord(_))
        ));

        let no_time = NewRecord {
            upload_time: String::new(),
            ..front_only()
        };
        assert!(matches!(
            store.create_record("alice", no_time).await,
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn record_serializes_with_camel_case_and_lowercase_status() {
        let record = front_only().into_record(ObjectId::new());
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["status"], "uploaded");
        assert_eq!(value["frontImagePath"], "/uploads/alice/a-front-1.jpg");
        assert!(value["backImagePath"].is_null());
        assert_eq!(value["uploadDate"], "2024-03-05");
    }

    #[test]
    fn missing_enrichment_fields_default_on_read() {
        let value = serde_json::json!({
            "frontImagePath": "/uploads/alice/a.jpg",
            "uploadDate": "2024-03-05",
            "uploadTime": "07:09:41",
        });
        let record: UploadRecord = serde_json::from_value(value).expect("deserialize");
        assert_eq!(record.status, RecordStatus::Uploaded);
        assert!(record.caption.is_none());
        assert!(record.id.is_none());
    }
}
