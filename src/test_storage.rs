use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, SeekFrom};

use crate::object_store::{
    BucketHandle, ListResult, ObjectHandle, ObjectReader, ObjectStoreClient,
};
use crate::{
    GcsConfig, GcsStorage, MemObjectStore, OpenMode, StorageError, StorageResult,
};

const TEST_BUCKET: &str = "test-bucket";
const TEST_CONTENT: &[u8] = "Brath\u{e4}hnchen".as_bytes();

fn init_log() {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
    );
}

fn test_config(bucket: &str) -> (GcsConfig, tempfile::NamedTempFile) {
    let creds = tempfile::NamedTempFile::new().unwrap();
    let config = GcsConfig::new("test-project", bucket, creds.path()).unwrap();
    (config, creds)
}

async fn test_storage() -> (GcsStorage, MemObjectStore, tempfile::NamedTempFile) {
    init_log();
    let store = MemObjectStore::new();
    let (config, creds) = test_config(TEST_BUCKET);
    let storage = GcsStorage::new(config, &store).await.unwrap();
    (storage, store, creds)
}

async fn save_bytes(storage: &GcsStorage, name: &str, content: &[u8]) -> String {
    let mut cursor = std::io::Cursor::new(content.to_vec());
    storage
        .save(name, &mut cursor, content.len() as u64, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_config_requires_bucket_and_credentials() {
    let creds = tempfile::NamedTempFile::new().unwrap();
    assert!(matches!(
        GcsConfig::new("p", "", creds.path()),
        Err(StorageError::Configuration(_))
    ));
    assert!(matches!(
        GcsConfig::new("p", "bucket", "/does/not/exist.json"),
        Err(StorageError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_save_and_open_round_trip() {
    let (storage, _, _creds) = test_storage().await;
    let name = save_bytes(&storage, "test_file", TEST_CONTENT).await;
    assert_eq!(name, "test_file");

    let mut file = storage.open("test_file", OpenMode::Read).await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), TEST_CONTENT);
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_round_trip_survives_spool_roll_over() {
    let (storage, _, _creds) = test_storage().await;
    let long_content = vec![b'a'; 1001];
    save_bytes(&storage, "long_file", &long_content).await;

    let mut file = storage.open("long_file", OpenMode::Read).await.unwrap();
    assert!(file.is_rolled());
    assert_eq!(file.read_to_end().await.unwrap(), long_content);
}

#[tokio::test]
async fn test_small_files_stay_in_memory() {
    let (storage, _, _creds) = test_storage().await;
    save_bytes(&storage, "small_file", &vec![b'a'; 1000]).await;

    let file = storage.open("small_file", OpenMode::Read).await.unwrap();
    assert!(!file.is_rolled());
    assert_eq!(file.size(), 1000);
}

#[tokio::test]
async fn test_open_without_write_never_uploads() {
    let (storage, store, _creds) = test_storage().await;
    save_bytes(&storage, "read_only", TEST_CONTENT).await;
    assert_eq!(store.upload_calls(), 1);

    let mut file = storage.open("read_only", OpenMode::Read).await.unwrap();
    file.read_to_end().await.unwrap();
    file.close().await.unwrap();
    assert!(!file.is_dirty());
    assert_eq!(store.upload_calls(), 1);
}

#[tokio::test]
async fn test_write_uploads_exactly_once_on_close() {
    let (storage, store, _creds) = test_storage().await;

    let mut file = storage.open("new_file", OpenMode::ReadWrite).await.unwrap();
    file.write(b"hello").await.unwrap();
    file.write(b" world").await.unwrap();
    assert!(file.is_dirty());
    // Nothing is uploaded until close.
    assert_eq!(store.upload_calls(), 0);

    file.close().await.unwrap();
    assert_eq!(store.upload_calls(), 1);
    assert_eq!(
        store.object_content(TEST_BUCKET, "new_file").unwrap(),
        b"hello world"
    );

    // Closing again does not re-upload.
    file.close().await.unwrap();
    assert_eq!(store.upload_calls(), 1);
}

#[tokio::test]
async fn test_zero_length_write_still_marks_dirty() {
    let (storage, store, _creds) = test_storage().await;

    let mut file = storage.open("empty_file", OpenMode::ReadWrite).await.unwrap();
    file.write(b"").await.unwrap();
    assert!(file.is_dirty());
    file.close().await.unwrap();

    assert_eq!(store.upload_calls(), 1);
    assert!(storage.exists("empty_file").await.unwrap());
    assert_eq!(storage.size("empty_file").await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_changed_files_are_reuploaded() {
    let (storage, _, _creds) = test_storage().await;
    save_bytes(&storage, "changing", b"").await;

    let mut file = storage.open("changing", OpenMode::ReadWrite).await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), b"");
    file.seek(SeekFrom::Start(0)).await.unwrap();
    file.write(TEST_CONTENT).await.unwrap();
    file.close().await.unwrap();

    let mut reopened = storage.open("changing", OpenMode::Read).await.unwrap();
    assert_eq!(reopened.read_to_end().await.unwrap(), TEST_CONTENT);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (storage, _, _creds) = test_storage().await;
    storage.delete("missing_file").await.unwrap();

    save_bytes(&storage, "victim", TEST_CONTENT).await;
    assert!(storage.exists("victim").await.unwrap());
    storage.delete("victim").await.unwrap();
    assert!(!storage.exists("victim").await.unwrap());
}

#[tokio::test]
async fn test_size_of_missing_object_is_none() {
    let (storage, _, _creds) = test_storage().await;
    assert_eq!(storage.size("nothing_here").await.unwrap(), None);

    save_bytes(&storage, "sized", TEST_CONTENT).await;
    assert_eq!(
        storage.size("sized").await.unwrap(),
        Some(TEST_CONTENT.len() as u64)
    );
}

#[tokio::test]
async fn test_timestamps_for_existing_and_missing() {
    let (storage, _, _creds) = test_storage().await;
    save_bytes(&storage, "stamped", TEST_CONTENT).await;

    let created = storage.created_time("stamped").await.unwrap().unwrap();
    let modified = storage.modified_time("stamped").await.unwrap().unwrap();
    assert!(modified >= created);

    assert!(storage.created_time("missing").await.unwrap().is_none());
    assert!(storage.modified_time("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_listdir_root_and_subdir() {
    let (storage, _, _creds) = test_storage().await;
    assert_eq!(save_bytes(&storage, "a/b.txt", b"hello").await, "a/b.txt");

    assert_eq!(
        storage.listdir("a").await.unwrap(),
        (vec![], vec!["b.txt".to_string()])
    );
    assert_eq!(
        storage.listdir("").await.unwrap(),
        (vec!["a".to_string()], vec![])
    );
    assert_eq!(
        storage.listdir("").await.unwrap(),
        storage.listdir("/").await.unwrap()
    );
    assert_eq!(
        storage.listdir("a").await.unwrap(),
        storage.listdir("a/").await.unwrap()
    );
}

#[tokio::test]
async fn test_listdir_groups_and_sorts() {
    let (storage, _, _creds) = test_storage().await;
    for name in ["subdir/z.txt", "subdir/a.txt", "subdir/m.txt"] {
        save_bytes(&storage, name, b"").await;
    }
    save_bytes(&storage, "subdir/b/nested", b"").await;
    save_bytes(&storage, "subdir/a/nested", b"").await;

    let (dirs, files) = storage.listdir("subdir").await.unwrap();
    assert_eq!(dirs, vec!["a", "b"]);
    assert_eq!(files, vec!["a.txt", "m.txt", "z.txt"]);
}

#[tokio::test]
async fn test_unsigned_url_is_plain_concatenation() {
    init_log();
    let store = MemObjectStore::new();
    let (config, _creds) = test_config("b");
    let storage = GcsStorage::new(config.with_unsigned_urls(true), &store)
        .await
        .unwrap();

    save_bytes(&storage, "f.txt", b"x").await;
    assert_eq!(
        storage.url("f.txt").await.unwrap(),
        "https://storage.googleapis.com/b/f.txt"
    );
}

#[tokio::test]
async fn test_signed_url_requires_existing_object() {
    let (storage, _, _creds) = test_storage().await;
    assert!(matches!(
        storage.url("missing.txt").await,
        Err(StorageError::NotFound(_))
    ));

    save_bytes(&storage, "present.txt", b"x").await;
    let url = storage.url("present.txt").await.unwrap();
    assert!(url.contains("Signature"));
    assert!(url.contains("Expires"));
}

#[tokio::test]
async fn test_subdir_prefixes_every_operation() {
    init_log();
    let store = MemObjectStore::new();
    let (config, _creds) = test_config(TEST_BUCKET);
    let storage = GcsStorage::new(config.with_subdir("media"), &store)
        .await
        .unwrap();

    let name = save_bytes(&storage, "x.txt", b"x").await;
    assert_eq!(name, "media/x.txt");
    assert!(store.object_content(TEST_BUCKET, "media/x.txt").is_some());
    assert!(storage.exists("x.txt").await.unwrap());
    assert_eq!(
        storage.listdir("").await.unwrap(),
        (vec![], vec!["x.txt".to_string()])
    );
}

#[tokio::test]
async fn test_path_escape_fails_operations() {
    let (storage, _, _creds) = test_storage().await;
    assert!(matches!(
        storage.open("../outside", OpenMode::Read).await,
        Err(StorageError::PathEscape(_))
    ));
    assert!(matches!(
        storage.delete("../outside").await,
        Err(StorageError::PathEscape(_))
    ));
    let mut cursor = std::io::Cursor::new(b"x".to_vec());
    assert!(matches!(
        storage.save("../outside", &mut cursor, 1, None).await,
        Err(StorageError::PathEscape(_))
    ));
}

#[tokio::test]
async fn test_content_type_explicit_guessed_and_default() {
    let (storage, store, _creds) = test_storage().await;

    save_bytes(&storage, "a/b.txt", b"hello").await;
    assert_eq!(
        store.object_content_type(TEST_BUCKET, "a/b.txt").unwrap(),
        "text/plain"
    );

    let mut cursor = std::io::Cursor::new(b"x".to_vec());
    storage
        .save("blob.bin", &mut cursor, 1, Some("application/x-custom"))
        .await
        .unwrap();
    assert_eq!(
        store.object_content_type(TEST_BUCKET, "blob.bin").unwrap(),
        "application/x-custom"
    );

    save_bytes(&storage, "no_extension", b"x").await;
    assert_eq!(
        store
            .object_content_type(TEST_BUCKET, "no_extension")
            .unwrap(),
        "application/octet-stream"
    );
}

#[tokio::test]
async fn test_unicode_object_names() {
    let (storage, _, _creds) = test_storage().await;
    let name = "test_file_\u{9670}\u{967d}.txt";
    save_bytes(&storage, name, TEST_CONTENT).await;
    assert!(storage.exists(name).await.unwrap());

    let mut file = storage.open(name, OpenMode::Read).await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), TEST_CONTENT);
}

#[tokio::test]
async fn test_read_mode_rejects_writes() {
    let (storage, _, _creds) = test_storage().await;
    save_bytes(&storage, "locked", TEST_CONTENT).await;

    let mut file = storage.open("locked", OpenMode::Read).await.unwrap();
    assert!(matches!(
        file.write(b"nope").await,
        Err(StorageError::PermissionDenied(_))
    ));
    assert!(!file.is_dirty());
}

#[tokio::test]
async fn test_closed_file_rejects_io() {
    let (storage, _, _creds) = test_storage().await;
    let mut file = storage.open("gone", OpenMode::ReadWrite).await.unwrap();
    file.close().await.unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(
        file.read(&mut buf).await,
        Err(StorageError::InvalidState(_))
    ));
    assert!(matches!(
        file.write(b"x").await,
        Err(StorageError::InvalidState(_))
    ));
    assert!(matches!(
        file.seek(SeekFrom::Start(0)).await,
        Err(StorageError::InvalidState(_))
    ));
}

// Store wrapper whose uploads fail while the flag is set, for exercising
// close-retry semantics.
#[derive(Clone)]
struct FlakyStore {
    inner: MemObjectStore,
    fail_uploads: Arc<AtomicBool>,
}

#[async_trait]
impl ObjectStoreClient for FlakyStore {
    async fn bucket(&self, name: &str) -> StorageResult<Box<dyn BucketHandle>> {
        Ok(Box::new(FlakyBucket {
            inner: self.inner.bucket(name).await?,
            fail_uploads: self.fail_uploads.clone(),
        }))
    }
}

struct FlakyBucket {
    inner: Box<dyn BucketHandle>,
    fail_uploads: Arc<AtomicBool>,
}

#[async_trait]
impl BucketHandle for FlakyBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_object(&self, name: &str) -> StorageResult<Option<Box<dyn ObjectHandle>>> {
        Ok(self.inner.get_object(name).await?.map(|inner| {
            Box::new(FlakyObject {
                inner,
                fail_uploads: self.fail_uploads.clone(),
            }) as Box<dyn ObjectHandle>
        }))
    }

    fn object(&self, name: &str) -> Box<dyn ObjectHandle> {
        Box::new(FlakyObject {
            inner: self.inner.object(name),
            fail_uploads: self.fail_uploads.clone(),
        })
    }

    async fn list(&self, prefix: &str, delimiter: &str) -> StorageResult<ListResult> {
        self.inner.list(prefix, delimiter).await
    }

    async fn delete_object(&self, name: &str) -> StorageResult<()> {
        self.inner.delete_object(name).await
    }
}

struct FlakyObject {
    inner: Box<dyn ObjectHandle>,
    fail_uploads: Arc<AtomicBool>,
}

#[async_trait]
impl ObjectHandle for FlakyObject {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn meta(&self) -> Option<&crate::ObjectMeta> {
        self.inner.meta()
    }

    async fn upload(
        &self,
        content: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Transport("injected upload failure".to_string()));
        }
        self.inner.upload(content, size, content_type).await
    }

    async fn open_reader(&self) -> StorageResult<ObjectReader> {
        self.inner.open_reader().await
    }

    async fn signed_url(&self, expires_in: Duration) -> StorageResult<String> {
        self.inner.signed_url(expires_in).await
    }
}

#[tokio::test]
async fn test_failed_upload_keeps_file_dirty_for_retry() {
    init_log();
    let mem = MemObjectStore::new();
    let flaky = FlakyStore {
        inner: mem.clone(),
        fail_uploads: Arc::new(AtomicBool::new(true)),
    };
    let (config, _creds) = test_config(TEST_BUCKET);
    let storage = GcsStorage::new(config, &flaky).await.unwrap();

    let mut file = storage.open("retry_me", OpenMode::ReadWrite).await.unwrap();
    file.write(b"important").await.unwrap();

    assert!(matches!(
        file.close().await,
        Err(StorageError::Transport(_))
    ));
    assert!(file.is_dirty());
    assert!(!file.is_closed());

    // Clear the fault and retry the close.
    flaky.fail_uploads.store(false, Ordering::SeqCst);
    file.close().await.unwrap();
    assert!(!file.is_dirty());
    assert!(file.is_closed());
    assert_eq!(
        mem.object_content(TEST_BUCKET, "retry_me").unwrap(),
        b"important"
    );
}
