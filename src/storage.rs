use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::gcs_client::GcsClient;
use crate::object_store::{BucketHandle, ObjectStoreClient};
use crate::remote_file::{OpenMode, RemoteFile};
use crate::safe_path::{remove_prefix, safe_join};
use crate::{
    StorageError, StorageResult, DEFAULT_CONTENT_TYPE, DEFAULT_SPOOL_MAX_SIZE,
    GCS_PUBLIC_URL_BASE, SIGNED_URL_TTL_SECS,
};

/// Immutable storage configuration. Checked once, at construction.
#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub project: String,
    pub bucket: String,
    pub credentials_file: PathBuf,
    /// Root all object names are resolved under. Empty means the bucket root.
    pub subdir: String,
    /// Build public URLs by concatenation instead of requesting signed ones.
    pub use_unsigned_urls: bool,
    pub default_content_type: String,
    pub spool_max_size: u64,
}

impl GcsConfig {
    pub fn new(
        project: impl Into<String>,
        bucket: impl Into<String>,
        credentials_file: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(StorageError::Configuration(
                "bucket name must not be empty".to_string(),
            ));
        }
        let credentials_file = credentials_file.into();
        if !credentials_file.exists() {
            return Err(StorageError::Configuration(format!(
                "credentials file not found: {}",
                credentials_file.display()
            )));
        }
        Ok(Self {
            project: project.into(),
            bucket,
            credentials_file,
            subdir: String::new(),
            use_unsigned_urls: false,
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            spool_max_size: DEFAULT_SPOOL_MAX_SIZE,
        })
    }

    pub fn with_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = subdir.into();
        self
    }

    pub fn with_unsigned_urls(mut self, unsigned: bool) -> Self {
        self.use_unsigned_urls = unsigned;
        self
    }

    pub fn with_default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    pub fn with_spool_max_size(mut self, max_size: u64) -> Self {
        self.spool_max_size = max_size;
        self
    }
}

/// The storage facade: every operation resolves its name against the
/// configured subdir first and talks to the bucket through the object-store
/// interface. The bucket handle is acquired eagerly at construction so a bad
/// bucket or credential fails here, not on first incidental use.
pub struct GcsStorage {
    config: GcsConfig,
    bucket: Box<dyn BucketHandle>,
}

impl GcsStorage {
    pub async fn new(config: GcsConfig, client: &dyn ObjectStoreClient) -> StorageResult<Self> {
        let bucket = client.bucket(&config.bucket).await?;
        Ok(Self { config, bucket })
    }

    /// Connects through the real GCS JSON API client.
    pub async fn connect(config: GcsConfig) -> StorageResult<Self> {
        let client = GcsClient::connect(&config.credentials_file, &config.project)?;
        Self::new(config, &client).await
    }

    pub fn config(&self) -> &GcsConfig {
        &self.config
    }

    fn resolve(&self, name: &str) -> StorageResult<String> {
        safe_join(&self.config.subdir, name)
    }

    /// Uploads `size` bytes of `content` directly to the resolved name and
    /// returns that name. Existing objects are overwritten; callers that
    /// need collision-free names must generate one before calling.
    pub async fn save(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let name = self.resolve(name)?;
        let content_type = content_type
            .map(str::to_string)
            .or_else(|| guess_content_type(&name).map(str::to_string))
            .unwrap_or_else(|| self.config.default_content_type.clone());
        self.bucket
            .object(&name)
            .upload(content, size, Some(&content_type))
            .await?;
        debug!("GcsStorage: saved {} ({} bytes, {})", name, size, content_type);
        Ok(name)
    }

    /// Opens the object as a [`RemoteFile`]. An existing object is downloaded
    /// into the local buffer; a missing one yields an empty buffer and no
    /// remote call until a dirty close.
    pub async fn open(&self, name: &str, mode: OpenMode) -> StorageResult<RemoteFile> {
        let name = self.resolve(name)?;
        let object = match self.bucket.get_object(&name).await? {
            Some(object) => object,
            None => self.bucket.object(&name),
        };
        RemoteFile::open(object, mode, self.config.spool_max_size).await
    }

    /// Deletes the object. Deleting a missing object is a success.
    pub async fn delete(&self, name: &str) -> StorageResult<()> {
        let name = self.resolve(name)?;
        match self.bucket.delete_object(&name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub async fn exists(&self, name: &str) -> StorageResult<bool> {
        let name = self.resolve(name)?;
        Ok(self.bucket.get_object(&name).await?.is_some())
    }

    /// Byte length of the object, or `None` when it does not exist.
    pub async fn size(&self, name: &str) -> StorageResult<Option<u64>> {
        let name = self.resolve(name)?;
        Ok(self
            .bucket
            .get_object(&name)
            .await?
            .and_then(|o| o.meta().map(|m| m.size)))
    }

    pub async fn created_time(&self, name: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let name = self.resolve(name)?;
        Ok(self
            .bucket
            .get_object(&name)
            .await?
            .and_then(|o| o.meta().and_then(|m| m.created)))
    }

    pub async fn modified_time(&self, name: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let name = self.resolve(name)?;
        Ok(self
            .bucket
            .get_object(&name)
            .await?
            .and_then(|o| o.meta().and_then(|m| m.updated)))
    }

    /// Lists direct children of `path`, returning sorted directory segments
    /// and file segments. `path` is treated as a directory prefix, so
    /// `listdir("a")` and `listdir("a/")` agree.
    pub async fn listdir(&self, path: &str) -> StorageResult<(Vec<String>, Vec<String>)> {
        let mut prefix = self.resolve(path)?;
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        let listing = self.bucket.list(&prefix, "/").await?;

        let mut dirs: Vec<String> = listing
            .prefixes
            .iter()
            .map(|p| remove_prefix(p, &prefix).trim_end_matches('/').to_string())
            .collect();
        let mut files: Vec<String> = listing
            .items
            .iter()
            .map(|name| remove_prefix(name, &prefix).to_string())
            .collect();
        dirs.sort();
        files.sort();
        Ok((dirs, files))
    }

    /// Public URL for the object. Unsigned mode concatenates the well-known
    /// host, bucket and name; signed mode asks the store for a URL valid for
    /// one hour and requires the object to exist.
    pub async fn url(&self, name: &str) -> StorageResult<String> {
        let name = self.resolve(name)?;
        if self.config.use_unsigned_urls {
            return Ok(format!(
                "{}/{}/{}",
                GCS_PUBLIC_URL_BASE,
                self.bucket.name(),
                name
            ));
        }
        let object = self
            .bucket
            .get_object(&name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.clone()))?;
        object
            .signed_url(Duration::from_secs(SIGNED_URL_TTL_SECS))
            .await
    }
}

/// Best-effort content type from the file extension. The facade falls back
/// to the configured default when this returns `None`.
pub(crate) fn guess_content_type(name: &str) -> Option<&'static str> {
    // Only the final path segment counts; a dot in a directory name is not
    // an extension.
    let file_name = name.rsplit('/').next()?;
    let ext = file_name.rsplit('.').next()?;
    if ext.len() == file_name.len() {
        // No dot at all.
        return None;
    }
    let mime = match ext.to_ascii_lowercase().as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/vnd.microsoft.icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime)
}
