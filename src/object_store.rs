use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::StorageResult;

/// Streaming handle to an object's content.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata snapshot of a remote object, taken when the handle was fetched.
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

/// One page-less listing result: full object names of direct children and
/// delimiter-grouped prefixes for deeper nesting.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<String>,
    pub prefixes: Vec<String>,
}

/// Entry point into an object store. The storage facade only ever asks it
/// for a bucket handle, once, at construction time.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn bucket(&self, name: &str) -> StorageResult<Box<dyn BucketHandle>>;
}

#[async_trait]
pub trait BucketHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Fetches an existing object together with its metadata. Returns `None`
    /// if no object with that exact name is present.
    async fn get_object(&self, name: &str) -> StorageResult<Option<Box<dyn ObjectHandle>>>;

    /// Handle to an object that may not exist yet. No remote call is made.
    fn object(&self, name: &str) -> Box<dyn ObjectHandle>;

    /// Lists objects under `prefix`, grouping names that contain `delimiter`
    /// past the prefix. The full result set is materialized, pagination is
    /// handled internally.
    async fn list(&self, prefix: &str, delimiter: &str) -> StorageResult<ListResult>;

    /// Deletes an object. Fails with `StorageError::NotFound` when absent so
    /// callers can decide whether absence matters.
    async fn delete_object(&self, name: &str) -> StorageResult<()>;
}

#[async_trait]
pub trait ObjectHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Metadata snapshot, present only on handles returned by
    /// [`BucketHandle::get_object`].
    fn meta(&self) -> Option<&ObjectMeta>;

    /// Uploads `size` bytes read from `content`, replacing the object's
    /// content. The length is explicit because spooled buffers do not report
    /// one through generic queries.
    async fn upload(
        &self,
        content: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    /// Opens the object's content for streaming download.
    async fn open_reader(&self) -> StorageResult<ObjectReader>;

    /// Generates a time-limited signed URL for the object.
    async fn signed_url(&self, expires_in: Duration) -> StorageResult<String>;
}
