use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, ReadBuf, SeekFrom};

use crate::{StorageError, StorageResult};

/// A random-access byte buffer that lives in memory until it grows past
/// `max_size`, at which point it transparently rolls over into an unnamed
/// temporary file. Read, write and seek behave identically before and after
/// the rollover. The temporary file is unlinked when the value is dropped.
pub struct SpooledTempFile {
    max_size: u64,
    len: u64,
    pos: u64,
    backend: Backend,
}

enum Backend {
    Memory(Cursor<Vec<u8>>),
    Disk(File),
}

impl SpooledTempFile {
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            len: 0,
            pos: 0,
            backend: Backend::Memory(Cursor::new(Vec::new())),
        }
    }

    /// Total content length, independent of the cursor position.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once the buffer has spilled to disk.
    pub fn is_rolled(&self) -> bool {
        matches!(self.backend, Backend::Disk(_))
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub async fn write(&mut self, buf: &[u8]) -> StorageResult<()> {
        let end = self.pos + buf.len() as u64;
        if matches!(self.backend, Backend::Memory(_)) && end > self.max_size {
            self.roll_over().await?;
        }
        match &mut self.backend {
            Backend::Memory(cursor) => {
                cursor.set_position(self.pos);
                std::io::Write::write_all(cursor, buf)?;
            }
            Backend::Disk(file) => {
                file.write_all(buf).await?;
            }
        }
        self.pos = end;
        if end > self.len {
            self.len = end;
        }
        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        let n = match &mut self.backend {
            Backend::Memory(cursor) => {
                cursor.set_position(self.pos);
                std::io::Read::read(cursor, buf)?
            }
            Backend::Disk(file) => file.read(buf).await?,
        };
        self.pos += n as u64;
        Ok(n)
    }

    /// Reads everything from the current position to the end of the buffer.
    pub async fn read_to_end(&mut self) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        match &mut self.backend {
            Backend::Memory(cursor) => {
                cursor.set_position(self.pos);
                std::io::Read::read_to_end(cursor, &mut out)?;
            }
            Backend::Disk(file) => {
                file.read_to_end(&mut out).await?;
            }
        }
        self.pos += out.len() as u64;
        Ok(out)
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> StorageResult<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.len as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if target < 0 {
            return Err(StorageError::IoError(format!(
                "seek before start of buffer: {}",
                target
            )));
        }
        let target = target as u64;
        match &mut self.backend {
            Backend::Memory(cursor) => cursor.set_position(target),
            Backend::Disk(file) => {
                file.seek(SeekFrom::Start(target)).await?;
            }
        }
        self.pos = target;
        Ok(target)
    }

    pub async fn rewind(&mut self) -> StorageResult<()> {
        self.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    async fn roll_over(&mut self) -> StorageResult<()> {
        let data = match &mut self.backend {
            Backend::Memory(cursor) => std::mem::take(cursor.get_mut()),
            Backend::Disk(_) => return Ok(()),
        };
        let std_file = tempfile::tempfile()
            .map_err(|e| StorageError::IoError(format!("create spool file failed: {}", e)))?;
        let mut file = File::from_std(std_file);
        file.write_all(&data).await?;
        file.seek(SeekFrom::Start(self.pos)).await?;
        debug!(
            "SpooledTempFile: rolled over to disk, {} bytes buffered",
            data.len()
        );
        self.backend = Backend::Disk(file);
        Ok(())
    }
}

impl AsyncRead for SpooledTempFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match &mut this.backend {
            Backend::Memory(cursor) => {
                let data = cursor.get_ref();
                let start = (this.pos as usize).min(data.len());
                let end = data.len().min(start + buf.remaining());
                buf.put_slice(&data[start..end]);
                this.pos += (end - start) as u64;
                Poll::Ready(Ok(()))
            }
            Backend::Disk(file) => {
                let before = buf.filled().len();
                match Pin::new(file).poll_read(cx, buf) {
                    Poll::Ready(Ok(())) => {
                        this.pos += (buf.filled().len() - before) as u64;
                        Poll::Ready(Ok(()))
                    }
                    other => other,
                }
            }
        }
    }
}
