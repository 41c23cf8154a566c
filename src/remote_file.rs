use tokio::io::{AsyncReadExt, SeekFrom};

use crate::object_store::ObjectHandle;
use crate::spooled::SpooledTempFile;
use crate::{StorageError, StorageResult};

const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// A remote object presented as a local random-access file.
///
/// Content is buffered in a [`SpooledTempFile`] and every write marks the
/// file dirty. On [`close`](RemoteFile::close) a dirty file is uploaded back
/// to the remote object in full, exactly once; a clean file never touches
/// the network. A failed upload keeps the file dirty so close can be
/// retried. After a successful close the file rejects all further I/O.
pub struct RemoteFile {
    object: Box<dyn ObjectHandle>,
    buffer: SpooledTempFile,
    mode: OpenMode,
    dirty: bool,
    closed: bool,
}

impl RemoteFile {
    /// Builds the file around `object`, downloading its current content into
    /// the buffer when the handle carries metadata (i.e. the object exists).
    /// A handle without metadata starts with an empty buffer, which gives
    /// create-on-close semantics for new objects.
    pub(crate) async fn open(
        object: Box<dyn ObjectHandle>,
        mode: OpenMode,
        spool_max_size: u64,
    ) -> StorageResult<Self> {
        let mut buffer = SpooledTempFile::new(spool_max_size);
        if object.meta().is_some() {
            let mut reader = object.open_reader().await?;
            let mut chunk = vec![0u8; DOWNLOAD_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buffer.write(&chunk[..n]).await?;
            }
            buffer.rewind().await?;
        }
        Ok(Self {
            object,
            buffer,
            mode,
            dirty: false,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        self.object.name()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True once the local buffer has spilled to disk.
    pub fn is_rolled(&self) -> bool {
        self.buffer.is_rolled()
    }

    /// Current buffer length in bytes.
    pub fn size(&self) -> u64 {
        self.buffer.len()
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        self.ensure_open()?;
        self.buffer.read(buf).await
    }

    pub async fn read_to_end(&mut self) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        self.buffer.read_to_end().await
    }

    /// Writes at the current cursor and marks the file dirty, zero-length
    /// writes included.
    pub async fn write(&mut self, buf: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        if self.mode == OpenMode::Read {
            return Err(StorageError::PermissionDenied(format!(
                "{} was opened read-only",
                self.object.name()
            )));
        }
        self.dirty = true;
        self.buffer.write(buf).await
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> StorageResult<u64> {
        self.ensure_open()?;
        self.buffer.seek(pos).await
    }

    /// Uploads the buffer to the remote object if anything was written, then
    /// shuts the file down. The upload sends the full buffer content with an
    /// explicit length, rewinding first.
    pub async fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        if self.dirty {
            let size = self.buffer.len();
            self.buffer.rewind().await?;
            self.object.upload(&mut self.buffer, size, None).await?;
            self.dirty = false;
            debug!(
                "RemoteFile: uploaded {} bytes to {}",
                size,
                self.object.name()
            );
        }
        self.closed = true;
        Ok(())
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::InvalidState(format!(
                "{} is closed",
                self.object.name()
            )));
        }
        Ok(())
    }
}
