use std::future::Future;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Uniform byte-range access to an immutable archive.
///
/// The contract is deliberately small — positioned reads, an optional total
/// size, a stable identifier, and a close hook — which is enough to back
/// the archive format on local files, HTTP servers, and cloud object
/// stores alike. Decorators (block caching, header pre-buffering) are
/// further implementations wrapping another implementation.
///
/// Independent reads may run concurrently; no ordering is guaranteed
/// between them. Within a single read the returned bytes correspond
/// exactly to `[offset, offset + len)` of the archive.
pub trait RangeReader: Send + Sync {
    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Reads past the end of the archive return a short (possibly empty)
    /// buffer; a zero-length request is a no-op returning an empty buffer.
    fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send;

    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// Fails with [`Error::UnexpectedNumberOfBytesReturned`] when the
    /// source delivers a short count.
    fn read_exact(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send
    where
        Self: Sized,
    {
        async move {
            let data = self.read(offset, length).await?;
            if data.len() == length as usize {
                Ok(data)
            } else {
                Err(Error::UnexpectedNumberOfBytesReturned(
                    length as usize,
                    data.len(),
                ))
            }
        }
    }

    /// Total archive size in bytes, when the backend knows it.
    fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Stable identifier for the underlying source, shared by every reader
    /// of the same archive and used as the cache key prefix.
    fn source_id(&self) -> &str;

    /// Release backend resources. Backends owning only RAII handles may
    /// rely on the default no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized,
    {
        async { Ok(()) }
    }
}
