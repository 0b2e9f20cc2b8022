use std::future::Future;

use bytes::Bytes;

use crate::error::Result;
use crate::range_reader::RangeReader;

/// In-memory backend over a `Bytes` buffer.
///
/// Useful for tests and for archives embedded in a binary; range reads are
/// zero-copy slices of the backing buffer.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
    source_id: String,
}

impl MemoryReader {
    /// Wrap `data`, identified by `source_id` for cache keying.
    pub fn new(data: impl Into<Bytes>, source_id: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            source_id: source_id.into(),
        }
    }
}

impl RangeReader for MemoryReader {
    fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send {
        let len = self.data.len() as u64;
        let start = offset.min(len);
        let end = (offset + u64::from(length)).min(len);
        #[expect(clippy::cast_possible_truncation)]
        let slice = self.data.slice(start as usize..end as usize);
        async move { Ok(slice) }
    }

    fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send {
        let len = self.data.len() as u64;
        async move { Ok(Some(len)) }
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slices_are_zero_copy_views() {
        let reader = MemoryReader::new(Bytes::from_static(b"0123456789"), "mem://test");
        assert_eq!(reader.read(2, 3).await.unwrap(), Bytes::from_static(b"234"));
        assert_eq!(reader.read(8, 5).await.unwrap(), Bytes::from_static(b"89"));
        assert_eq!(reader.read(10, 1).await.unwrap(), Bytes::new());
        assert_eq!(reader.size().await.unwrap(), Some(10));
        assert_eq!(reader.source_id(), "mem://test");
    }
}
