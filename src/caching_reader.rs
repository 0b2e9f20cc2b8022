use std::future::Future;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt as _, TryStreamExt as _, stream};
use tokio::sync::OnceCell;

use crate::cache::RangeCache;
use crate::error::{Error, Result};
use crate::range::ByteRange;
use crate::range_reader::RangeReader;

/// Default number of bytes pre-read from the start of the archive.
pub const DEFAULT_HEADER_PREFETCH: u32 = 16 * 1024;

/// Default cache block size.
pub const DEFAULT_CACHE_BLOCK_SIZE: u32 = 64 * 1024;

/// Tuning knobs for [`CachingReader`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Bytes pre-read at construction and pinned for the reader's
    /// lifetime; reads entirely within this prefix skip cache and backend.
    /// Zero disables the pre-buffer.
    pub header_prefetch_size: u32,
    /// Cache block granularity. Requests are decomposed into aligned
    /// blocks of this size; zero disables alignment and caches requests
    /// by their exact range instead.
    pub block_size: u32,
    /// Maximum blocks fetched in parallel for one logical read.
    pub fetch_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            header_prefetch_size: DEFAULT_HEADER_PREFETCH,
            block_size: DEFAULT_CACHE_BLOCK_SIZE,
            fetch_concurrency: 8,
        }
    }
}

/// Caching decorator around any [`RangeReader`].
///
/// Adds two independently toggleable features: a pinned header pre-buffer
/// for the hot, small reads at the start of the archive, and a
/// block-aligned range cache with parallel multi-block gather. Any served
/// read is byte-identical to what the bare backend would return.
pub struct CachingReader<R> {
    inner: R,
    cache: RangeCache,
    archive: Arc<str>,
    block_size: u32,
    fetch_concurrency: usize,
    header: Option<Bytes>,
    size_hint: OnceCell<Option<u64>>,
}

impl<R: RangeReader> CachingReader<R> {
    /// Wrap `inner`, sharing `cache` with other readers.
    ///
    /// Performs the header prefetch read (if enabled) before returning.
    pub async fn try_new(inner: R, cache: RangeCache, config: CacheConfig) -> Result<Self> {
        if config.fetch_concurrency == 0 {
            return Err(Error::InvalidConfig("fetch_concurrency must be positive"));
        }
        let archive: Arc<str> = Arc::from(inner.source_id());
        let header = if config.header_prefetch_size > 0 {
            // A short result is fine; tiny archives fit entirely.
            Some(inner.read(0, config.header_prefetch_size).await?)
        } else {
            None
        };
        Ok(Self {
            inner,
            cache,
            archive,
            block_size: config.block_size,
            fetch_concurrency: config.fetch_concurrency,
            header,
            size_hint: OnceCell::new(),
        })
    }

    /// The wrapped backend.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    async fn resolve_size(&self) -> Result<Option<u64>> {
        self.size_hint
            .get_or_try_init(|| self.inner.size())
            .await
            .copied()
    }

    async fn block(&self, range: ByteRange) -> Result<Bytes> {
        self.cache
            .get_or_load(&self.archive, range, self.inner.read(range.offset, range.length))
            .await
    }

    async fn read_aligned(&self, offset: u64, length: u32) -> Result<Bytes> {
        let size = self.resolve_size().await?;
        let mut length = u64::from(length);
        if let Some(size) = size {
            if offset >= size {
                return Ok(Bytes::new());
            }
            length = length.min(size - offset);
        }

        let block_size = u64::from(self.block_size);
        let first = offset / block_size;
        let last = (offset + length - 1) / block_size;
        let blocks = (first..=last).map(|index| {
            let start = index * block_size;
            let block_len = match size {
                Some(size) => block_size.min(size - start),
                None => block_size,
            };
            #[expect(clippy::cast_possible_truncation)]
            let block_len = block_len as u32;
            ByteRange::new(start, block_len)
        });

        let parts: Vec<Bytes> = stream::iter(blocks)
            .map(|range| self.block(range))
            .buffered(self.fetch_concurrency)
            .try_collect()
            .await?;

        // Common case: one block serves the whole request as a view.
        #[expect(clippy::cast_possible_truncation)]
        if let [part] = parts.as_slice() {
            let begin = (offset - first * block_size) as usize;
            if begin >= part.len() {
                return Ok(Bytes::new());
            }
            let end = part.len().min(begin + length as usize);
            return Ok(part.slice(begin..end));
        }

        #[expect(clippy::cast_possible_truncation)]
        let mut out = BytesMut::with_capacity(length as usize);
        let mut cursor = offset;
        let target_end = offset + length;
        for (index, part) in parts.iter().enumerate() {
            let block_start = (first + index as u64) * block_size;
            #[expect(clippy::cast_possible_truncation)]
            let begin = (cursor - block_start) as usize;
            if begin >= part.len() {
                // A short block means the archive ended here.
                break;
            }
            #[expect(clippy::cast_possible_truncation)]
            let take = (part.len() - begin).min((target_end - cursor) as usize);
            out.extend_from_slice(&part[begin..begin + take]);
            cursor += take as u64;
            if cursor >= target_end {
                break;
            }
        }
        Ok(out.freeze())
    }
}

impl<R: RangeReader> RangeReader for CachingReader<R> {
    fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            if length == 0 {
                return Ok(Bytes::new());
            }
            if let Some(header) = &self.header {
                let end = offset + u64::from(length);
                if end <= header.len() as u64 {
                    #[expect(clippy::cast_possible_truncation)]
                    return Ok(header.slice(offset as usize..end as usize));
                }
            }
            if self.block_size == 0 {
                return self.block(ByteRange::new(offset, length)).await;
            }
            self.read_aligned(offset, length).await
        }
    }

    fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send {
        self.resolve_size()
    }

    fn source_id(&self) -> &str {
        &self.archive
    }

    fn close(&self) -> impl Future<Output = Result<()>> + Send {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::backends::MemoryReader;

    struct CountingReader {
        inner: MemoryReader,
        reads: AtomicU32,
    }

    impl CountingReader {
        fn new(data: &[u8]) -> Self {
            Self {
                inner: MemoryReader::new(Bytes::copy_from_slice(data), "mem://counting"),
                reads: AtomicU32::new(0),
            }
        }

        fn read_count(&self) -> u32 {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl RangeReader for CountingReader {
        fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(offset, length)
        }

        fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send {
            self.inner.size()
        }

        fn source_id(&self) -> &str {
            self.inner.source_id()
        }
    }

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn reader_with(
        data: &[u8],
        config: CacheConfig,
    ) -> CachingReader<CountingReader> {
        CachingReader::try_new(CountingReader::new(data), RangeCache::default(), config)
            .await
            .unwrap()
    }

    fn no_prefetch(block_size: u32) -> CacheConfig {
        CacheConfig {
            header_prefetch_size: 0,
            block_size,
            fetch_concurrency: 4,
        }
    }

    #[tokio::test]
    async fn rejects_zero_concurrency() {
        let result = CachingReader::try_new(
            CountingReader::new(b"x"),
            RangeCache::default(),
            CacheConfig {
                fetch_concurrency: 0,
                ..CacheConfig::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn equals_bare_backend_across_block_boundaries() {
        let data = test_data(20_000);
        let bare = MemoryReader::new(Bytes::copy_from_slice(&data), "mem://bare");
        let caching = reader_with(&data, no_prefetch(4096)).await;

        for (offset, length) in [
            (0u64, 1u32),
            (4095, 2),
            (4096, 4096),
            (4094, 4),
            (0, 8192),
            (1, 12_288),
            (19_000, 5_000),
            (20_000, 10),
            (25_000, 10),
            (0, 0),
        ] {
            let expected = bare.read(offset, length).await.unwrap();
            let got = caching.read(offset, length).await.unwrap();
            assert_eq!(got, expected, "mismatch at ({offset}, {length})");
        }
    }

    #[tokio::test]
    async fn blocks_are_fetched_once() {
        let data = test_data(16_384);
        let caching = reader_with(&data, no_prefetch(4096)).await;

        caching.read(0, 8192).await.unwrap();
        let after_first = caching.get_ref().read_count();
        assert_eq!(after_first, 2, "two blocks for an 8 KiB read");

        // Overlapping read reuses both cached blocks, fetching only the third.
        caching.read(4096, 8192).await.unwrap();
        assert_eq!(caching.get_ref().read_count(), after_first + 1);

        caching.read(0, 4096).await.unwrap();
        assert_eq!(caching.get_ref().read_count(), after_first + 1);
    }

    #[tokio::test]
    async fn header_prefetch_skips_backend() {
        let data = test_data(8192);
        let caching = reader_with(
            &data,
            CacheConfig {
                header_prefetch_size: 1024,
                block_size: 4096,
                fetch_concurrency: 4,
            },
        )
        .await;
        let after_construction = caching.get_ref().read_count();
        assert_eq!(after_construction, 1, "construction reads the prefix once");

        let got = caching.read(100, 200).await.unwrap();
        assert_eq!(&got[..], &data[100..300]);
        assert_eq!(caching.get_ref().read_count(), after_construction);

        // A read straddling the prefix boundary goes to the cache path.
        let got = caching.read(1000, 100).await.unwrap();
        assert_eq!(&got[..], &data[1000..1100]);
        assert!(caching.get_ref().read_count() > after_construction);
    }

    #[tokio::test]
    async fn exact_range_mode_caches_requests() {
        let data = test_data(4096);
        let caching = reader_with(&data, no_prefetch(0)).await;

        let first = caching.read(10, 100).await.unwrap();
        let second = caching.read(10, 100).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(caching.get_ref().read_count(), 1);
        assert_eq!(&first[..], &data[10..110]);
    }

    #[tokio::test]
    async fn read_at_archive_size_is_empty() {
        let data = test_data(4096);
        let caching = reader_with(&data, no_prefetch(1024)).await;
        assert_eq!(caching.read(4096, 16).await.unwrap(), Bytes::new());
    }
}
