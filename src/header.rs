use std::io::{Cursor, Write};
use std::num::NonZeroU64;

use bytes::Buf;

use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::range::ByteRange;

/// Exact byte length of the archive header.
pub const HEADER_SIZE: usize = 127;

/// Highest zoom level the header may declare.
pub const MAX_HEADER_ZOOM: u8 = 30;

static V3_MAGIC: &[u8] = b"PMTiles";
static V2_MAGIC: &[u8] = b"PM";

const FORMAT_VERSION: u8 = 3;

/// Payload format of the tiles in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TileType {
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
}

impl TryFrom<u8> for TileType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TileType::Unknown),
            1 => Ok(TileType::Mvt),
            2 => Ok(TileType::Png),
            3 => Ok(TileType::Jpeg),
            4 => Ok(TileType::Webp),
            _ => Err(Error::InvalidHeader("unrecognized tile type byte")),
        }
    }
}

impl From<TileType> for u8 {
    fn from(value: TileType) -> Self {
        match value {
            TileType::Unknown => 0,
            TileType::Mvt => 1,
            TileType::Png => 2,
            TileType::Jpeg => 3,
            TileType::Webp => 4,
        }
    }
}

/// The fixed-size archive header.
///
/// Coordinates are stored in E7 (degrees times `10^7`) exactly as on disk;
/// the degree-valued accessors convert on demand. Serializing a parsed
/// header reproduces the original 127 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Extent of the compressed root directory.
    pub root_offset: u64,
    /// Length of the compressed root directory.
    pub root_length: u64,
    /// Offset of the compressed JSON metadata region.
    pub metadata_offset: u64,
    /// Length of the compressed JSON metadata region.
    pub metadata_length: u64,
    /// Offset of the leaf-directories region.
    pub leaf_offset: u64,
    /// Length of the leaf-directories region.
    pub leaf_length: u64,
    /// Offset of the tile-data region.
    pub data_offset: u64,
    /// Length of the tile-data region.
    pub data_length: u64,
    /// Number of addressable tiles, when known.
    pub n_addressed_tiles: Option<NonZeroU64>,
    /// Number of tile entries, when known.
    pub n_tile_entries: Option<NonZeroU64>,
    /// Number of distinct tile blobs, when known.
    pub n_tile_contents: Option<NonZeroU64>,
    /// Whether tile data is laid out in tile-id order.
    pub clustered: bool,
    /// Compression of directories and metadata.
    pub internal_compression: Compression,
    /// Compression of tile blobs.
    pub tile_compression: Compression,
    /// Payload format of the tiles.
    pub tile_type: TileType,
    /// Minimum zoom level present.
    pub min_zoom: u8,
    /// Maximum zoom level present.
    pub max_zoom: u8,
    /// Western bound, E7 degrees.
    pub min_lon_e7: i32,
    /// Southern bound, E7 degrees.
    pub min_lat_e7: i32,
    /// Eastern bound, E7 degrees.
    pub max_lon_e7: i32,
    /// Northern bound, E7 degrees.
    pub max_lat_e7: i32,
    /// Suggested initial zoom.
    pub center_zoom: u8,
    /// Suggested center longitude, E7 degrees.
    pub center_lon_e7: i32,
    /// Suggested center latitude, E7 degrees.
    pub center_lat_e7: i32,
}

const E7: f64 = 10_000_000.0;

impl Header {
    /// A header with sane defaults for a fresh archive: world bounds,
    /// gzip-compressed directories, everything else zeroed.
    #[must_use]
    pub fn new(tile_compression: Compression, tile_type: TileType) -> Self {
        Self {
            root_offset: 0,
            root_length: 0,
            metadata_offset: 0,
            metadata_length: 0,
            leaf_offset: 0,
            leaf_length: 0,
            data_offset: 0,
            data_length: 0,
            n_addressed_tiles: None,
            n_tile_entries: None,
            n_tile_contents: None,
            clustered: true,
            internal_compression: Compression::Gzip,
            tile_compression,
            tile_type,
            min_zoom: 0,
            max_zoom: 0,
            min_lon_e7: -1_800_000_000,
            min_lat_e7: -850_000_000,
            max_lon_e7: 1_800_000_000,
            max_lat_e7: 850_000_000,
            center_zoom: 0,
            center_lon_e7: 0,
            center_lat_e7: 0,
        }
    }

    /// Parse a header from exactly [`HEADER_SIZE`] bytes, verifying the
    /// magic, version, and field invariants.
    pub fn try_from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != HEADER_SIZE {
            return Err(Error::InvalidHeader("header must be exactly 127 bytes"));
        }
        if &raw[..V3_MAGIC.len()] != V3_MAGIC {
            return if &raw[..V2_MAGIC.len()] == V2_MAGIC {
                Err(Error::InvalidHeader("v2 archives are not supported"))
            } else {
                Err(Error::InvalidHeader("bad magic number"))
            };
        }

        let mut buf = Cursor::new(&raw[V3_MAGIC.len()..]);
        if buf.get_u8() != FORMAT_VERSION {
            return Err(Error::InvalidHeader("unsupported version, expected 3"));
        }

        let header = Self {
            root_offset: buf.get_u64_le(),
            root_length: buf.get_u64_le(),
            metadata_offset: buf.get_u64_le(),
            metadata_length: buf.get_u64_le(),
            leaf_offset: buf.get_u64_le(),
            leaf_length: buf.get_u64_le(),
            data_offset: buf.get_u64_le(),
            data_length: buf.get_u64_le(),
            n_addressed_tiles: NonZeroU64::new(buf.get_u64_le()),
            n_tile_entries: NonZeroU64::new(buf.get_u64_le()),
            n_tile_contents: NonZeroU64::new(buf.get_u64_le()),
            clustered: match buf.get_u8() {
                0 => false,
                1 => true,
                _ => return Err(Error::InvalidHeader("clustered flag must be 0 or 1")),
            },
            internal_compression: buf.get_u8().try_into()?,
            tile_compression: buf.get_u8().try_into()?,
            tile_type: buf.get_u8().try_into()?,
            min_zoom: buf.get_u8(),
            max_zoom: buf.get_u8(),
            min_lon_e7: buf.get_i32_le(),
            min_lat_e7: buf.get_i32_le(),
            max_lon_e7: buf.get_i32_le(),
            max_lat_e7: buf.get_i32_le(),
            center_zoom: buf.get_u8(),
            center_lon_e7: buf.get_i32_le(),
            center_lat_e7: buf.get_i32_le(),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.min_zoom > self.max_zoom {
            return Err(Error::InvalidHeader("min_zoom exceeds max_zoom"));
        }
        if self.max_zoom > MAX_HEADER_ZOOM {
            return Err(Error::InvalidHeader("max_zoom exceeds 30"));
        }
        if self.min_lon_e7 > self.max_lon_e7 {
            return Err(Error::InvalidHeader("min_lon exceeds max_lon"));
        }
        if self.min_lat_e7 > self.max_lat_e7 {
            return Err(Error::InvalidHeader("min_lat exceeds max_lat"));
        }
        Ok(())
    }

    /// Serialize into exactly [`HEADER_SIZE`] bytes.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(V3_MAGIC)?;
        writer.write_all(&[FORMAT_VERSION])?;
        writer.write_all(&self.root_offset.to_le_bytes())?;
        writer.write_all(&self.root_length.to_le_bytes())?;
        writer.write_all(&self.metadata_offset.to_le_bytes())?;
        writer.write_all(&self.metadata_length.to_le_bytes())?;
        writer.write_all(&self.leaf_offset.to_le_bytes())?;
        writer.write_all(&self.leaf_length.to_le_bytes())?;
        writer.write_all(&self.data_offset.to_le_bytes())?;
        writer.write_all(&self.data_length.to_le_bytes())?;
        writer.write_all(&self.n_addressed_tiles.map_or(0, NonZeroU64::get).to_le_bytes())?;
        writer.write_all(&self.n_tile_entries.map_or(0, NonZeroU64::get).to_le_bytes())?;
        writer.write_all(&self.n_tile_contents.map_or(0, NonZeroU64::get).to_le_bytes())?;
        writer.write_all(&[
            u8::from(self.clustered),
            self.internal_compression.into(),
            self.tile_compression.into(),
            self.tile_type.into(),
            self.min_zoom,
            self.max_zoom,
        ])?;
        writer.write_all(&self.min_lon_e7.to_le_bytes())?;
        writer.write_all(&self.min_lat_e7.to_le_bytes())?;
        writer.write_all(&self.max_lon_e7.to_le_bytes())?;
        writer.write_all(&self.max_lat_e7.to_le_bytes())?;
        writer.write_all(&[self.center_zoom])?;
        writer.write_all(&self.center_lon_e7.to_le_bytes())?;
        writer.write_all(&self.center_lat_e7.to_le_bytes())?;
        Ok(())
    }

    /// Extent of the compressed root directory.
    #[must_use]
    pub fn root_directory_range(&self) -> ByteRange {
        ByteRange::new(self.root_offset, clamp_u32(self.root_length))
    }

    /// Extent of the compressed JSON metadata.
    #[must_use]
    pub fn metadata_range(&self) -> ByteRange {
        ByteRange::new(self.metadata_offset, clamp_u32(self.metadata_length))
    }

    /// Western bound in degrees.
    #[must_use]
    pub fn min_longitude(&self) -> f64 {
        f64::from(self.min_lon_e7) / E7
    }

    /// Southern bound in degrees.
    #[must_use]
    pub fn min_latitude(&self) -> f64 {
        f64::from(self.min_lat_e7) / E7
    }

    /// Eastern bound in degrees.
    #[must_use]
    pub fn max_longitude(&self) -> f64 {
        f64::from(self.max_lon_e7) / E7
    }

    /// Northern bound in degrees.
    #[must_use]
    pub fn max_latitude(&self) -> f64 {
        f64::from(self.max_lat_e7) / E7
    }

    /// Center longitude in degrees.
    #[must_use]
    pub fn center_longitude(&self) -> f64 {
        f64::from(self.center_lon_e7) / E7
    }

    /// Center latitude in degrees.
    #[must_use]
    pub fn center_latitude(&self) -> f64 {
        f64::from(self.center_lat_e7) / E7
    }
}

// Directory extents are bounded well below u32 in practice; anything larger
// is clamped so a later exact-read fails loudly instead of overflowing.
fn clamp_u32(length: u64) -> u32 {
    u32::try_from(length).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            root_offset: 127,
            root_length: 64,
            metadata_offset: 191,
            metadata_length: 16,
            leaf_offset: 0,
            leaf_length: 0,
            data_offset: 207,
            data_length: 1024,
            n_addressed_tiles: NonZeroU64::new(1),
            n_tile_entries: NonZeroU64::new(1),
            n_tile_contents: NonZeroU64::new(1),
            clustered: true,
            internal_compression: Compression::Gzip,
            tile_compression: Compression::Gzip,
            tile_type: TileType::Mvt,
            min_zoom: 0,
            max_zoom: 0,
            min_lon_e7: -1_800_000_000,
            min_lat_e7: -850_000_000,
            max_lon_e7: 1_800_000_000,
            max_lat_e7: 850_000_000,
            center_zoom: 0,
            center_lon_e7: 0,
            center_lat_e7: 0,
        }
    }

    #[test]
    fn serialize_deserialize_is_identity() {
        let header = sample_header();
        let mut raw = Vec::new();
        header.write_to(&mut raw).unwrap();
        assert_eq!(raw.len(), HEADER_SIZE);

        let parsed = Header::try_from_bytes(&raw).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn degree_accessors() {
        let header = sample_header();
        assert_eq!(header.min_longitude(), -180.0);
        assert_eq!(header.max_longitude(), 180.0);
        assert_eq!(header.min_latitude(), -85.0);
        assert_eq!(header.max_latitude(), 85.0);
        assert_eq!(header.center_longitude(), 0.0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut raw = Vec::new();
        sample_header().write_to(&mut raw).unwrap();
        raw[0] = b'X';
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(Error::InvalidHeader("bad magic number"))
        ));
    }

    #[test]
    fn rejects_v2_archives() {
        let mut raw = Vec::new();
        sample_header().write_to(&mut raw).unwrap();
        raw[..7].copy_from_slice(b"PM\0\0\0\0\0");
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(Error::InvalidHeader("v2 archives are not supported"))
        ));
    }

    #[test]
    fn rejects_wrong_length() {
        let mut raw = Vec::new();
        sample_header().write_to(&mut raw).unwrap();
        raw.pop();
        assert!(Header::try_from_bytes(&raw).is_err());
        raw.push(0);
        raw.push(0);
        assert!(Header::try_from_bytes(&raw).is_err());
    }

    #[test]
    fn rejects_field_invariant_violations() {
        let mut header = sample_header();
        header.min_zoom = 4;
        header.max_zoom = 2;
        let mut raw = Vec::new();
        header.write_to(&mut raw).unwrap();
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(Error::InvalidHeader("min_zoom exceeds max_zoom"))
        ));

        let mut header = sample_header();
        header.max_zoom = 31;
        let mut raw = Vec::new();
        header.write_to(&mut raw).unwrap();
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(Error::InvalidHeader("max_zoom exceeds 30"))
        ));

        let mut header = sample_header();
        header.min_lat_e7 = 860_000_000;
        let mut raw = Vec::new();
        header.write_to(&mut raw).unwrap();
        assert!(matches!(
            Header::try_from_bytes(&raw),
            Err(Error::InvalidHeader("min_lat exceeds max_lat"))
        ));
    }

    #[test]
    fn rejects_bad_enum_bytes() {
        let mut raw = Vec::new();
        sample_header().write_to(&mut raw).unwrap();

        let mut bad = raw.clone();
        bad[96] = 2; // clustered
        assert!(Header::try_from_bytes(&bad).is_err());

        let mut bad = raw.clone();
        bad[97] = 9; // internal compression
        assert!(Header::try_from_bytes(&bad).is_err());

        let mut bad = raw;
        bad[99] = 9; // tile type
        assert!(Header::try_from_bytes(&bad).is_err());
    }
}
