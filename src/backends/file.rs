use std::fs::File;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::pool::ByteBufferPool;
use crate::range_reader::RangeReader;

/// Local-file backend using positioned reads on a shared handle.
///
/// Reads are staged through the buffer pool and executed on the blocking
/// thread pool, so one reader can serve many concurrent requests without
/// seek contention. The archive size is captured at open time; the file is
/// treated as immutable for the reader's lifetime.
#[derive(Debug, Clone)]
pub struct FileReader {
    file: Arc<File>,
    len: u64,
    source_id: String,
    pool: ByteBufferPool,
}

impl FileReader {
    /// Open `path` with a private buffer pool.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_pool(path, ByteBufferPool::default())
    }

    /// Open `path`, staging reads through `pool`.
    pub fn open_with_pool<P: AsRef<Path>>(path: P, pool: ByteBufferPool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(Error::from_io)?;
        let len = file.metadata().map_err(Error::from_io)?.len();
        let source_id = path
            .canonicalize()
            .map_or_else(|_| path.display().to_string(), |p| p.display().to_string());
        Ok(Self {
            file: Arc::new(file),
            len,
            source_id,
            pool,
        })
    }

    /// The file length captured at open time.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl RangeReader for FileReader {
    fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            if length == 0 || offset >= self.len {
                return Ok(Bytes::new());
            }
            #[expect(clippy::cast_possible_truncation)]
            let length = u64::from(length).min(self.len - offset) as u32;

            let file = Arc::clone(&self.file);
            let pool = self.pool.clone();
            tokio::task::spawn_blocking(move || {
                let mut staging = pool.io(length as usize);
                read_at_full(&file, offset, &mut staging)?;
                Ok(Bytes::copy_from_slice(&staging))
            })
            .await
            .map_err(|join| Error::IoFatal(Box::new(join)))?
        }
    }

    fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send {
        async move { Ok(Some(self.len)) }
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

fn read_at_full(file: &File, mut offset: u64, buf: &mut [u8]) -> Result<()> {
    let total = buf.len();
    let mut filled = 0;
    while filled < total {
        match read_at(file, &mut buf[filled..], offset) {
            Ok(0) => {
                // The length was clamped to the size seen at open; running
                // out early means the file shrank underneath us.
                return Err(Error::UnexpectedNumberOfBytesReturned(total, filled));
            }
            Ok(n) => {
                filled += n;
                offset += n as u64;
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(Error::from_io(err)),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn fixture(content: &[u8]) -> (tempfile::NamedTempFile, FileReader) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        let reader = FileReader::open(file.path()).unwrap();
        (file, reader)
    }

    #[tokio::test]
    async fn reads_exact_ranges() {
        let (_guard, reader) = fixture(b"Hello, world!");
        assert_eq!(reader.read(4, 6).await.unwrap(), Bytes::from_static(b"o, wor"));
        assert_eq!(reader.size().await.unwrap(), Some(13));
    }

    #[tokio::test]
    async fn read_past_end_is_short() {
        let (_guard, reader) = fixture(b"0123456789");
        assert_eq!(reader.read(8, 10).await.unwrap(), Bytes::from_static(b"89"));
        assert_eq!(reader.read(10, 4).await.unwrap(), Bytes::new());
        assert_eq!(reader.read(100, 4).await.unwrap(), Bytes::new());
        assert_eq!(reader.read(0, 0).await.unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn read_exact_rejects_short_counts() {
        let (_guard, reader) = fixture(b"0123456789");
        let err = reader.read_exact(8, 10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedNumberOfBytesReturned(10, 2)
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = FileReader::open("/definitely/not/here.pmtiles").unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn staging_buffers_are_pooled() {
        let pool = ByteBufferPool::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; 64 * 1024]).unwrap();
        let reader = FileReader::open_with_pool(file.path(), pool.clone()).unwrap();

        reader.read(0, 16 * 1024).await.unwrap();
        reader.read(0, 16 * 1024).await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
    }
}
