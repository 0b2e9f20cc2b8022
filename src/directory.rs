use std::fmt::{Debug, Formatter};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use varint_rs::{VarintReader, VarintWriter};

use crate::error::{Error, Result};
use crate::tile::{TileCoord, TileId};

/// In-memory record size: `tile_id` + `offset` + `length` + `run_length`.
const ENTRY_STRIDE: usize = 24;

/// One directory entry.
///
/// `run_length == 0` marks a leaf entry whose extent names a child
/// directory inside the leaf-directories region; `run_length >= 1` marks a
/// tile entry addressing `run_length` consecutive tile ids that share one
/// extent inside the tile-data region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// First tile id covered by this entry.
    pub tile_id: u64,
    /// Offset relative to the region the entry points into.
    pub offset: u64,
    /// Extent length in bytes.
    pub length: u32,
    /// Number of consecutive tile ids covered; zero for leaf entries.
    pub run_length: u32,
}

impl DirEntry {
    /// Whether this entry points at a child directory.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.run_length == 0
    }

    /// The last tile id covered by a tile entry (the id itself for runs of 1).
    fn last_tile_id(&self) -> u64 {
        self.tile_id + u64::from(self.run_length.max(1)) - 1
    }

    /// Coordinates of every tile id covered by this entry. Empty for leaves.
    pub fn iter_coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (self.tile_id..self.tile_id + u64::from(self.run_length))
            .filter_map(|id| TileId::new(id).ok())
            .map(TileCoord::from)
    }
}

/// A decoded directory: an immutable, id-sorted sequence of entries.
///
/// Entries live in a single contiguous buffer of fixed-stride records, so
/// indexed access is O(1) and lookup is a binary search with no per-entry
/// allocation. Cloning shares the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Directory {
    packed: Bytes,
}

impl Debug for Directory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Directory [entries: {}]", self.n_entries())
    }
}

impl Directory {
    /// Pack a sequence of entries. Intended for encoding and tests; the
    /// entries must already be id-sorted.
    #[must_use]
    pub fn from_entries<I: IntoIterator<Item = DirEntry>>(entries: I) -> Self {
        let iter = entries.into_iter();
        let mut packed = BytesMut::with_capacity(iter.size_hint().0 * ENTRY_STRIDE);
        for entry in iter {
            packed.put_u64_le(entry.tile_id);
            packed.put_u64_le(entry.offset);
            packed.put_u32_le(entry.length);
            packed.put_u32_le(entry.run_length);
        }
        Self {
            packed: packed.freeze(),
        }
    }

    /// Decode the on-disk representation (already decompressed): an entry
    /// count followed by columns of delta-coded tile ids, run lengths,
    /// lengths, and back-referencing offsets.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        let n_entries = read_varint_usize(&mut reader)?;
        if n_entries == 0 {
            return Err(Error::InvalidDirectory("directory has no entries"));
        }
        let Some(packed_len) = n_entries.checked_mul(ENTRY_STRIDE) else {
            return Err(Error::InvalidDirectory("entry count overflows"));
        };

        let mut packed = BytesMut::zeroed(packed_len);

        // Tile ids, delta-coded and strictly increasing.
        let mut tile_id: u64 = 0;
        for index in 0..n_entries {
            let delta = read_varint_u64(&mut reader)?;
            if index > 0 && delta == 0 {
                return Err(Error::InvalidDirectory("tile ids are not increasing"));
            }
            tile_id = tile_id
                .checked_add(delta)
                .ok_or(Error::InvalidDirectory("tile id overflows"))?;
            packed[index * ENTRY_STRIDE..index * ENTRY_STRIDE + 8]
                .copy_from_slice(&tile_id.to_le_bytes());
        }

        // Run lengths.
        for index in 0..n_entries {
            let run_length = read_varint_u32(&mut reader)?;
            packed[index * ENTRY_STRIDE + 20..index * ENTRY_STRIDE + 24]
                .copy_from_slice(&run_length.to_le_bytes());
        }

        // Lengths.
        for index in 0..n_entries {
            let length = read_varint_u32(&mut reader)?;
            packed[index * ENTRY_STRIDE + 16..index * ENTRY_STRIDE + 20]
                .copy_from_slice(&length.to_le_bytes());
        }

        // Offsets; zero means "directly after the previous entry".
        let mut prev_end: Option<u64> = None;
        for index in 0..n_entries {
            let raw = read_varint_u64(&mut reader)?;
            let offset = if raw == 0 {
                prev_end.ok_or(Error::InvalidDirectory(
                    "first entry back-references a previous offset",
                ))?
            } else {
                raw - 1
            };
            packed[index * ENTRY_STRIDE + 8..index * ENTRY_STRIDE + 16]
                .copy_from_slice(&offset.to_le_bytes());
            let length = u64::from((&packed[index * ENTRY_STRIDE + 16..]).get_u32_le());
            prev_end = Some(offset + length);
        }

        let directory = Self {
            packed: packed.freeze(),
        };
        directory.validate_runs()?;
        Ok(directory)
    }

    fn validate_runs(&self) -> Result<()> {
        for index in 1..self.n_entries() {
            let prev = self.entry_unchecked(index - 1);
            let next = self.entry_unchecked(index);
            if !prev.is_leaf() && prev.last_tile_id() >= next.tile_id {
                return Err(Error::InvalidDirectory("run overlaps the next entry"));
            }
        }
        Ok(())
    }

    /// Re-encode into the on-disk representation (uncompressed).
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.packed.len() / 2);
        // Infallible: Vec<u8> writes cannot fail.
        #[expect(clippy::unwrap_used)]
        {
            out.write_usize_varint(self.n_entries()).unwrap();
            let mut prev_id = 0;
            for entry in self.iter() {
                out.write_u64_varint(entry.tile_id - prev_id).unwrap();
                prev_id = entry.tile_id;
            }
            for entry in self.iter() {
                out.write_u32_varint(entry.run_length).unwrap();
            }
            for entry in self.iter() {
                out.write_u32_varint(entry.length).unwrap();
            }
            let mut prev_end: Option<u64> = None;
            for entry in self.iter() {
                if prev_end == Some(entry.offset) {
                    out.write_u64_varint(0).unwrap();
                } else {
                    out.write_u64_varint(entry.offset + 1).unwrap();
                }
                prev_end = Some(entry.offset + u64::from(entry.length));
            }
        }
        out.into()
    }

    /// Number of entries.
    #[must_use]
    pub fn n_entries(&self) -> usize {
        self.packed.len() / ENTRY_STRIDE
    }

    /// The entry at `index`, if in bounds.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<DirEntry> {
        (index < self.n_entries()).then(|| self.entry_unchecked(index))
    }

    fn entry_unchecked(&self, index: usize) -> DirEntry {
        let mut record = &self.packed[index * ENTRY_STRIDE..(index + 1) * ENTRY_STRIDE];
        DirEntry {
            tile_id: record.get_u64_le(),
            offset: record.get_u64_le(),
            length: record.get_u32_le(),
            run_length: record.get_u32_le(),
        }
    }

    fn tile_id_at(&self, index: usize) -> u64 {
        (&self.packed[index * ENTRY_STRIDE..]).get_u64_le()
    }

    /// Locate the entry responsible for `tile_id`.
    ///
    /// Returns the tile entry whose run covers the id, or the leaf entry
    /// the search must descend into, or `None` when the directory proves
    /// the id absent.
    #[must_use]
    pub fn find_tile_id(&self, tile_id: u64) -> Option<DirEntry> {
        // Last entry with an id <= the target.
        let n = self.n_entries();
        let insertion = partition_point(n, |index| self.tile_id_at(index) <= tile_id);
        if insertion == 0 {
            return None;
        }
        let candidate = self.entry_unchecked(insertion - 1);
        if candidate.is_leaf() || tile_id <= candidate.last_tile_id() {
            Some(candidate)
        } else {
            None
        }
    }

    /// Iterate entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = DirEntry> + '_ {
        (0..self.n_entries()).map(|index| self.entry_unchecked(index))
    }

    /// Approximate heap weight, used by the directory cache.
    #[must_use]
    pub(crate) fn weight(&self) -> usize {
        self.packed.len()
    }
}

fn partition_point<F: FnMut(usize) -> bool>(n: usize, mut pred: F) -> usize {
    let mut lo = 0;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn read_varint_usize(reader: &mut &[u8]) -> Result<usize> {
    reader
        .read_usize_varint()
        .map_err(|_| Error::InvalidDirectory("truncated varint"))
}

fn read_varint_u64(reader: &mut &[u8]) -> Result<u64> {
    reader
        .read_u64_varint()
        .map_err(|_| Error::InvalidDirectory("truncated varint"))
}

fn read_varint_u32(reader: &mut &[u8]) -> Result<u32> {
    reader
        .read_u32_varint()
        .map_err(|_| Error::InvalidDirectory("truncated varint"))
}
