use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::object_store::{
    BucketHandle, ListResult, ObjectHandle, ObjectMeta, ObjectReader, ObjectStoreClient,
};
use crate::{StorageError, StorageResult, GCS_PUBLIC_URL_BASE};

#[derive(Clone)]
struct MemObject {
    data: Vec<u8>,
    content_type: Option<String>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

type BucketMap = HashMap<String, HashMap<String, MemObject>>;

/// In-memory implementation of the object-store interface. Buckets are
/// created on first access. Mainly a test double, but also usable as an
/// embedded backend.
#[derive(Clone, Default)]
pub struct MemObjectStore {
    buckets: Arc<RwLock<BucketMap>>,
    upload_calls: Arc<AtomicU64>,
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upload calls performed against any object, across clones.
    pub fn upload_calls(&self) -> u64 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Raw content of an object, if present.
    pub fn object_content(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.read().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(name))
            .map(|o| o.data.clone())
    }

    /// Content type recorded for an object, if present.
    pub fn object_content_type(&self, bucket: &str, name: &str) -> Option<String> {
        let buckets = self.buckets.read().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(name))
            .and_then(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStoreClient for MemObjectStore {
    async fn bucket(&self, name: &str) -> StorageResult<Box<dyn BucketHandle>> {
        self.buckets
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        Ok(Box::new(MemBucket {
            store: self.clone(),
            name: name.to_string(),
        }))
    }
}

struct MemBucket {
    store: MemObjectStore,
    name: String,
}

impl MemBucket {
    fn handle(&self, name: &str, meta: Option<ObjectMeta>) -> MemObjectHandle {
        MemObjectHandle {
            store: self.store.clone(),
            bucket: self.name.clone(),
            name: name.to_string(),
            meta,
        }
    }
}

#[async_trait]
impl BucketHandle for MemBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_object(&self, name: &str) -> StorageResult<Option<Box<dyn ObjectHandle>>> {
        let buckets = self.store.buckets.read().unwrap();
        let obj = match buckets.get(&self.name).and_then(|b| b.get(name)) {
            Some(obj) => obj,
            None => return Ok(None),
        };
        let meta = ObjectMeta {
            size: obj.data.len() as u64,
            created: Some(obj.created),
            updated: Some(obj.updated),
            content_type: obj.content_type.clone(),
        };
        Ok(Some(Box::new(self.handle(name, Some(meta)))))
    }

    fn object(&self, name: &str) -> Box<dyn ObjectHandle> {
        Box::new(self.handle(name, None))
    }

    async fn list(&self, prefix: &str, delimiter: &str) -> StorageResult<ListResult> {
        let buckets = self.store.buckets.read().unwrap();
        let objects = buckets.get(&self.name);
        let mut items = Vec::new();
        let mut prefixes = Vec::new();
        if let Some(objects) = objects {
            for name in objects.keys() {
                let rest = match name.strip_prefix(prefix) {
                    Some(rest) => rest,
                    None => continue,
                };
                match rest.find(delimiter) {
                    Some(idx) if !delimiter.is_empty() => {
                        let group = format!("{}{}", prefix, &rest[..idx + delimiter.len()]);
                        if !prefixes.contains(&group) {
                            prefixes.push(group);
                        }
                    }
                    _ => items.push(name.clone()),
                }
            }
        }
        items.sort();
        prefixes.sort();
        Ok(ListResult { items, prefixes })
    }

    async fn delete_object(&self, name: &str) -> StorageResult<()> {
        let mut buckets = self.store.buckets.write().unwrap();
        let removed = buckets.get_mut(&self.name).and_then(|b| b.remove(name));
        match removed {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }
}

struct MemObjectHandle {
    store: MemObjectStore,
    bucket: String,
    name: String,
    meta: Option<ObjectMeta>,
}

#[async_trait]
impl ObjectHandle for MemObjectHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn meta(&self) -> Option<&ObjectMeta> {
        self.meta.as_ref()
    }

    async fn upload(
        &self,
        content: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let mut data = Vec::with_capacity(size as usize);
        content.take(size).read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            return Err(StorageError::IoError(format!(
                "upload of {} ended after {} of {} bytes",
                self.name,
                data.len(),
                size
            )));
        }
        self.store.upload_calls.fetch_add(1, Ordering::SeqCst);

        let now = Utc::now();
        let mut buckets = self.store.buckets.write().unwrap();
        let objects = buckets.entry(self.bucket.clone()).or_default();
        let created = objects
            .get(&self.name)
            .map(|existing| existing.created)
            .unwrap_or(now);
        objects.insert(
            self.name.clone(),
            MemObject {
                data,
                content_type: content_type.map(str::to_string),
                created,
                updated: now,
            },
        );
        Ok(())
    }

    async fn open_reader(&self) -> StorageResult<ObjectReader> {
        let buckets = self.store.buckets.read().unwrap();
        match buckets.get(&self.bucket).and_then(|b| b.get(&self.name)) {
            Some(obj) => Ok(Box::new(std::io::Cursor::new(obj.data.clone()))),
            None => Err(StorageError::NotFound(self.name.clone())),
        }
    }

    async fn signed_url(&self, expires_in: Duration) -> StorageResult<String> {
        let buckets = self.store.buckets.read().unwrap();
        if buckets
            .get(&self.bucket)
            .and_then(|b| b.get(&self.name))
            .is_none()
        {
            return Err(StorageError::NotFound(self.name.clone()));
        }
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        Ok(format!(
            "{}/{}/{}?GoogleAccessId=mem&Expires={}&Signature=unsigned",
            GCS_PUBLIC_URL_BASE, self.bucket, self.name, expires
        ))
    }
}
