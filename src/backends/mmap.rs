use std::future::Future;
use std::path::Path;

use bytes::{Buf as _, Bytes};
use fmmap::tokio::{AsyncMmapFile, AsyncMmapFileExt as _, AsyncOptions};

use crate::error::{Error, Result};
use crate::range_reader::RangeReader;

/// Memory-mapped local-file backend.
///
/// An alternative to [`FileReader`](crate::FileReader) that trades address
/// space for syscall-free reads; useful when the same archive is hit from
/// many tasks.
pub struct MmapReader {
    file: AsyncMmapFile,
    source_id: String,
}

impl std::fmt::Debug for MmapReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapReader")
            .field("source_id", &self.source_id)
            .finish_non_exhaustive()
    }
}

impl MmapReader {
    /// Map `path` read-only.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        // Surface a missing file as NotFound before mmap turns it into a
        // less descriptive failure.
        std::fs::metadata(path).map_err(Error::from_io)?;

        let file = AsyncMmapFile::open_with_options(path, AsyncOptions::new().read(true))
            .await
            .map_err(|err| Error::IoFatal(Box::new(err)))?;
        let source_id = path
            .canonicalize()
            .map_or_else(|_| path.display().to_string(), |p| p.display().to_string());
        Ok(Self { file, source_id })
    }
}

impl RangeReader for MmapReader {
    fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            let len = self.file.len() as u64;
            if length == 0 || offset >= len {
                return Ok(Bytes::new());
            }
            #[expect(clippy::cast_possible_truncation)]
            let take = u64::from(length).min(len - offset) as usize;
            #[expect(clippy::cast_possible_truncation)]
            let mut reader = self
                .file
                .reader(offset as usize)
                .map_err(|err| Error::IoFatal(Box::new(err)))?;
            Ok(reader.copy_to_bytes(take))
        }
    }

    fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send {
        async move { Ok(Some(self.file.len() as u64)) }
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[tokio::test]
    async fn mirrors_file_semantics() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"Hello, world!").unwrap();
        file.flush().unwrap();

        let reader = MmapReader::open(file.path()).await.unwrap();
        assert_eq!(reader.read(4, 6).await.unwrap(), Bytes::from_static(b"o, wor"));
        assert_eq!(reader.read(12, 10).await.unwrap(), Bytes::from_static(b"!"));
        assert_eq!(reader.read(13, 1).await.unwrap(), Bytes::new());
        assert_eq!(reader.size().await.unwrap(), Some(13));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = MmapReader::open("/definitely/not/here.pmtiles")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
