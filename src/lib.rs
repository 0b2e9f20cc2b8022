//! Random, byte-granular, read-only access to PMTiles v3 archives stored
//! on local files, HTTP(S) servers, or cloud object stores.
//!
//! The crate is built from three layers:
//!
//! - the [`RangeReader`] contract with backends for files
//!   ([`FileReader`], [`MmapReader`]), memory ([`MemoryReader`]), HTTP
//!   ([`HttpReader`], behind the `http` feature), and cloud object storage
//!   ([`ObjectStoreReader`]); plus the [`CachingReader`] decorator adding a
//!   header pre-buffer and a block-aligned range cache;
//! - the archive model: [`Header`], packed [`Directory`] entries, the
//!   Hilbert [`TileId`]/[`TileCoord`] codec, and [`Metadata`];
//! - [`PmTilesReader`], which resolves tile ids through the directory tree
//!   (via a shared [`DirectoryCache`]) and decompresses tiles on demand,
//!   with the [`ByteBufferPool`] bounding allocator churn on hot paths.
//!
//! ```no_run
//! # async fn example() -> rangetiles::Result<()> {
//! use rangetiles::{FileReader, PmTilesReader, TileCoord};
//!
//! let backend = FileReader::open("tiles.pmtiles")?;
//! let reader = PmTilesReader::try_from_source(backend).await?;
//! if let Some(tile) = reader.get_tile(TileCoord::new(0, 0, 0)?).await? {
//!     println!("{} bytes", tile.len());
//! }
//! # Ok(())
//! # }
//! ```

mod async_reader;
pub use async_reader::PmTilesReader;

mod backends;
#[cfg(feature = "http")]
pub use backends::{HttpAuth, HttpReader, HttpReaderBuilder, RetryPolicy};
pub use backends::{FileReader, MemoryReader, MmapReader, ObjectStoreReader};

mod cache;
pub use cache::{CachePolicy, CacheStats, DEFAULT_CACHE_MAX_WEIGHT, DirectoryCache, RangeCache};

mod caching_reader;
pub use caching_reader::{
    CacheConfig, CachingReader, DEFAULT_CACHE_BLOCK_SIZE, DEFAULT_HEADER_PREFETCH,
};

mod compression;
pub use compression::Compression;

mod directory;
pub use directory::{DirEntry, Directory};

mod error;
pub use error::{Error, Result};

mod header;
pub use header::{HEADER_SIZE, Header, MAX_HEADER_ZOOM, TileType};

mod metadata;
pub use metadata::Metadata;

mod pool;
pub use pool::{
    BufferKind, ByteBufferPool, DEFAULT_MAX_POOLED_BUFFERS, DEFAULT_POOL_BLOCK_SIZE, PoolConfig,
    PoolStats, PooledBuf,
};

mod range;
pub use range::ByteRange;

mod range_reader;
pub use range_reader::RangeReader;

mod tile;
pub use tile::{MAX_TILE_ID, MAX_ZOOM, PYRAMID_SIZE_BY_ZOOM, TileCoord, TileId};

/// Re-export of crate exposed in our API to simplify dependency management
pub use bytes;
/// Re-export of crate exposed in our API to simplify dependency management
pub use object_store;
/// Re-export of crate exposed in our API to simplify dependency management
#[cfg(feature = "http")]
pub use reqwest;
/// Re-export of crate exposed in our API to simplify dependency management
pub use url;
