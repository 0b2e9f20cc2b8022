use std::sync::Arc;

use crate::compression::Compression;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by readers, caches, and backends.
///
/// A missing tile is *not* an error; lookups return `Ok(None)`. Backend
/// failures are split into [`Error::NotFound`], [`Error::IoTransient`]
/// (retry budget already exhausted), and [`Error::IoFatal`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The 127-byte archive footer violated an invariant.
    #[error("invalid PMTiles header: {0}")]
    InvalidHeader(&'static str),

    /// A directory failed to decode or violated ordering invariants.
    #[error("invalid PMTiles directory: {0}")]
    InvalidDirectory(&'static str),

    /// The compression byte is not in the recognized set, or the
    /// algorithm cannot be applied here.
    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(Compression),

    /// A tile blob failed to decompress.
    #[error("corrupt tile data: {0}")]
    CorruptTile(#[source] std::io::Error),

    /// The archive (or object) does not exist.
    #[error("source not found: {0}")]
    NotFound(String),

    /// Retryable backend failure, surfaced after the retry budget ran out.
    #[error("transient I/O failure: {0}")]
    IoTransient(#[source] BoxedSource),

    /// Authentication, permission, or other non-retryable backend failure.
    #[error("I/O failure: {0}")]
    IoFatal(#[source] BoxedSource),

    /// Tile coordinates or a tile id outside the Hilbert domain.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The reader has been closed; no further operations are possible.
    #[error("reader is closed")]
    Closed,

    /// A constructor was handed an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A backend returned fewer bytes than an exact read demanded.
    #[error("unexpected number of bytes: expected {0}, got {1}")]
    UnexpectedNumberOfBytesReturned(usize, usize),

    /// A backend returned more bytes than were requested.
    #[error("response body too long: got {0}, requested {1}")]
    ResponseBodyTooLong(usize, usize),

    /// The HTTP server ignored the `Range` header.
    #[error("range requests unsupported by {0}")]
    RangeRequestsUnsupported(String),

    /// The JSON metadata region did not parse.
    #[error("invalid archive metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A failure raised by a coalesced cache load and shared by every
    /// waiter of that load.
    #[error("{0}")]
    Shared(Arc<Error>),
}

impl Error {
    /// Classify an I/O error into the transient/fatal split of the
    /// backend failure model.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(err.to_string()),
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::WouldBlock => Error::IoTransient(Box::new(err)),
            _ => Error::IoFatal(Box::new(err)),
        }
    }

    /// True for failures a caller may reasonably retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::IoTransient(_) => true,
            Error::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// True when the underlying source does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(err: Arc<Error>) -> Self {
        // Unwrap the Arc when this waiter is the only one left.
        match Arc::try_unwrap(err) {
            Ok(err) => err,
            Err(err) => Error::Shared(err),
        }
    }
}
