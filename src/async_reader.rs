use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::Stream;
use log::debug;
use tokio::sync::OnceCell;

use crate::cache::DirectoryCache;
use crate::compression::{decompress_into, decompress_tile};
use crate::directory::{DirEntry, Directory};
use crate::error::{Error, Result};
use crate::header::{HEADER_SIZE, Header};
use crate::metadata::Metadata;
use crate::pool::ByteBufferPool;
use crate::range::ByteRange;
use crate::range_reader::RangeReader;
use crate::tile::{MAX_ZOOM, TileCoord, TileId, zoom_id_range};

/// Directory trees deeper than this are considered corrupt.
const MAX_DIRECTORY_DEPTH: u8 = 4;

/// Random-access reader over one PMTiles archive.
///
/// Construction parses and validates the header; afterwards the reader is
/// stateless between calls apart from the parsed header, lazily parsed
/// metadata, and cache handles, and is safe for concurrent use. Directory
/// loads go through a [`DirectoryCache`] that may be shared across readers
/// of the same archive.
#[derive(Debug)]
pub struct PmTilesReader<B> {
    backend: B,
    header: Header,
    archive: Arc<str>,
    dir_cache: DirectoryCache,
    pool: ByteBufferPool,
    metadata: OnceCell<Metadata>,
    closed: AtomicBool,
}

impl<B: RangeReader> PmTilesReader<B> {
    /// Open an archive with a private directory cache and buffer pool.
    pub async fn try_from_source(backend: B) -> Result<Self> {
        Self::try_from_parts(backend, DirectoryCache::default(), ByteBufferPool::default()).await
    }

    /// Open an archive sharing `dir_cache` with other readers.
    pub async fn try_from_cached_source(backend: B, dir_cache: DirectoryCache) -> Result<Self> {
        Self::try_from_parts(backend, dir_cache, ByteBufferPool::default()).await
    }

    /// Open an archive with explicit cache and pool handles.
    pub async fn try_from_parts(
        backend: B,
        dir_cache: DirectoryCache,
        pool: ByteBufferPool,
    ) -> Result<Self> {
        #[expect(clippy::cast_possible_truncation)]
        let header_bytes = backend.read_exact(0, HEADER_SIZE as u32).await?;
        let header = Header::try_from_bytes(&header_bytes)?;
        let archive: Arc<str> = Arc::from(backend.source_id());
        debug!(
            "opened archive {archive}: zoom {}..{}, {:?} tiles",
            header.min_zoom, header.max_zoom, header.tile_type
        );
        Ok(Self {
            backend,
            header,
            archive,
            dir_cache,
            pool,
            metadata: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// The parsed archive header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The archive identifier used for cache keying.
    #[must_use]
    pub fn archive_id(&self) -> &str {
        &self.archive
    }

    /// Archive metadata, fetched and parsed on first use.
    pub async fn metadata(&self) -> Result<&Metadata> {
        self.ensure_open()?;
        self.metadata
            .get_or_try_init(|| async {
                let range = self.header.metadata_range();
                if range.is_empty() {
                    return Ok(Metadata::default());
                }
                let raw = self.backend.read_exact(range.offset, range.length).await?;
                let mut scratch = self.pool.scratch(raw.len().saturating_mul(4));
                let out = scratch.as_mut_vec();
                out.clear();
                decompress_into(self.header.internal_compression, &raw, out, |err| {
                    Error::IoFatal(Box::new(err))
                })
                .await?;
                Metadata::from_json(out)
            })
            .await
    }

    /// Tile id for a `(z, x, y)` address.
    pub fn tile_id(&self, z: u8, x: u32, y: u32) -> Result<TileId> {
        Ok(TileCoord::new(z, x, y)?.into())
    }

    /// `(z, x, y)` address of a tile id.
    #[must_use]
    pub fn tile_index(&self, tile_id: TileId) -> TileCoord {
        tile_id.into()
    }

    /// Fetch and decompress one tile. Returns `Ok(None)` when the archive
    /// does not address the id.
    pub async fn get_tile(&self, tile: impl Into<TileId>) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let tile_id = tile.into();
        let Some(entry) = self.find_tile_entry(tile_id.value()).await? else {
            return Ok(None);
        };
        let data = self
            .backend
            .read_exact(self.header.data_offset + entry.offset, entry.length)
            .await?;
        let data = decompress_tile(self.header.tile_compression, data, &self.pool).await?;
        Ok(Some(data))
    }

    /// Fetch a tile by `(z, x, y)`, validating the coordinates first.
    pub async fn get_tile_zxy(&self, z: u8, x: u32, y: u32) -> Result<Option<Bytes>> {
        self.get_tile(TileCoord::new(z, x, y)?).await
    }

    async fn find_tile_entry(&self, tile_id: u64) -> Result<Option<DirEntry>> {
        let mut range = self.header.root_directory_range();
        for _ in 0..MAX_DIRECTORY_DEPTH {
            let directory = self.read_directory(range).await?;
            match directory.find_tile_id(tile_id) {
                None => return Ok(None),
                Some(entry) if entry.is_leaf() => {
                    range = ByteRange::new(self.header.leaf_offset + entry.offset, entry.length);
                }
                Some(entry) => return Ok(Some(entry)),
            }
        }
        Err(Error::InvalidDirectory("leaf directories nest too deeply"))
    }

    async fn read_directory(&self, range: ByteRange) -> Result<Directory> {
        self.dir_cache
            .get_or_load(&self.archive, range, async {
                let raw = self.backend.read_exact(range.offset, range.length).await?;
                let mut scratch = self.pool.scratch(raw.len().saturating_mul(4));
                let out = scratch.as_mut_vec();
                out.clear();
                decompress_into(self.header.internal_compression, &raw, out, |_| {
                    Error::InvalidDirectory("directory decompression failed")
                })
                .await?;
                Directory::try_from_bytes(out)
            })
            .await
    }

    /// Lazily walk every tile entry in the directory tree.
    ///
    /// The stream is single-pass and may be dropped at any point; leaf
    /// directories are loaded on demand and not retained.
    pub fn entries(&self) -> impl Stream<Item = Result<DirEntry>> + '_ {
        try_stream! {
            self.ensure_open()?;
            let mut pending = VecDeque::from([self.header.root_directory_range()]);
            while let Some(range) = pending.pop_front() {
                let directory = self.read_directory(range).await?;
                for entry in directory.iter() {
                    if entry.is_leaf() {
                        pending.push_back(ByteRange::new(
                            self.header.leaf_offset + entry.offset,
                            entry.length,
                        ));
                    } else {
                        yield entry;
                    }
                }
            }
        }
    }

    /// Lazily yield the coordinates of every tile addressed at `zoom`,
    /// skipping directory subtrees that cannot intersect the zoom level.
    pub fn tile_indices_at_zoom(&self, zoom: u8) -> impl Stream<Item = Result<TileCoord>> + '_ {
        try_stream! {
            self.ensure_open()?;
            if zoom > MAX_ZOOM {
                Err(Error::OutOfRange(format!(
                    "zoom {zoom} exceeds maximum {MAX_ZOOM}"
                )))?;
            }
            let window = zoom_id_range(zoom);
            let mut pending = VecDeque::from([self.header.root_directory_range()]);
            while let Some(range) = pending.pop_front() {
                let directory = self.read_directory(range).await?;
                for index in 0..directory.n_entries() {
                    let Some(entry) = directory.entry(index) else { break };
                    // Entries are sorted, so everything from here on starts
                    // past the window.
                    if entry.tile_id >= window.end {
                        break;
                    }
                    if entry.is_leaf() {
                        // A child covers ids from its own tile_id up to the
                        // next entry; skip children entirely below the window.
                        if let Some(next) = directory.entry(index + 1) {
                            if next.tile_id <= window.start {
                                continue;
                            }
                        }
                        pending.push_back(ByteRange::new(
                            self.header.leaf_offset + entry.offset,
                            entry.length,
                        ));
                    } else {
                        let first = entry.tile_id.max(window.start);
                        let last = (entry.tile_id + u64::from(entry.run_length)).min(window.end);
                        for id in first..last {
                            yield TileCoord::from(TileId::new(id)?);
                        }
                    }
                }
            }
        }
    }

    /// Close the reader: drop this archive's cached directories and release
    /// the backend. Idempotent; subsequent operations fail with
    /// [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing archive {}", self.archive);
        self.dir_cache.invalidate_archive(&self.archive);
        self.backend.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}
