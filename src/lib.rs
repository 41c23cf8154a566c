mod gcs_client;
mod mem_store;
mod object_store;
mod remote_file;
mod safe_path;
mod spooled;
mod storage;

#[cfg(test)]
mod test_storage;

pub use gcs_client::{GcsClient, ServiceAccountKey};
pub use mem_store::MemObjectStore;
pub use object_store::{
    BucketHandle, ListResult, ObjectHandle, ObjectMeta, ObjectReader, ObjectStoreClient,
};
pub use remote_file::{OpenMode, RemoteFile};
pub use safe_path::{prepare_name, remove_prefix, safe_join, safe_join_bytes};
pub use spooled::SpooledTempFile;
pub use storage::{GcsConfig, GcsStorage};

use thiserror::Error;

#[macro_use]
extern crate log;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("path escapes storage root: {0}")]
    PathEscape(String),
    #[error("invalid path encoding: {0}")]
    Encoding(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err.to_string())
    }
}

/// Public host for unsigned object URLs.
pub const GCS_PUBLIC_URL_BASE: &str = "https://storage.googleapis.com";

/// Buffered remote files stay in memory up to this many bytes before
/// spilling to a temporary file on disk.
pub const DEFAULT_SPOOL_MAX_SIZE: u64 = 1000;

/// Content type used when none is given and none can be guessed.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Lifetime of signed URLs, in seconds.
pub const SIGNED_URL_TTL_SECS: u64 = 3600;
