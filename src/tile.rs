#![allow(clippy::unreadable_literal)]

use std::fmt;

use crate::error::{Error, Result};

/// Highest zoom level addressable by a tile id; `4^27` no longer leaves
/// headroom in 64 bits for the pyramid offsets.
pub const MAX_ZOOM: u8 = 26;

/// The pre-computed sizes of the tile pyramid for each zoom level:
/// `PYRAMID_SIZE_BY_ZOOM[z]` is the id of the first tile at zoom `z`,
/// i.e. `(4^z - 1) / 3`.
pub const PYRAMID_SIZE_BY_ZOOM: [u64; 28] = [
    /*  0 */ 0,
    /*  1 */ 1,
    /*  2 */ 5,
    /*  3 */ 21,
    /*  4 */ 85,
    /*  5 */ 341,
    /*  6 */ 1365,
    /*  7 */ 5461,
    /*  8 */ 21845,
    /*  9 */ 87381,
    /* 10 */ 349525,
    /* 11 */ 1398101,
    /* 12 */ 5592405,
    /* 13 */ 22369621,
    /* 14 */ 89478485,
    /* 15 */ 357913941,
    /* 16 */ 1431655765,
    /* 17 */ 5726623061,
    /* 18 */ 22906492245,
    /* 19 */ 91625968981,
    /* 20 */ 366503875925,
    /* 21 */ 1466015503701,
    /* 22 */ 5864062014805,
    /* 23 */ 23456248059221,
    /* 24 */ 93824992236885,
    /* 25 */ 375299968947541,
    /* 26 */ 1501199875790165,
    /* 27 */ 6004799503160661,
];

/// Largest valid tile id (the last id at [`MAX_ZOOM`]).
pub const MAX_TILE_ID: u64 = PYRAMID_SIZE_BY_ZOOM[27] - 1;

/// A validated Hilbert tile id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(u64);

impl TileId {
    /// Validate a raw id. Fails with [`Error::OutOfRange`] past [`MAX_TILE_ID`].
    pub fn new(value: u64) -> Result<Self> {
        if value > MAX_TILE_ID {
            return Err(Error::OutOfRange(format!(
                "tile id {value} exceeds maximum {MAX_TILE_ID}"
            )));
        }
        Ok(Self(value))
    }

    /// The raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A validated `(z, x, y)` tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    z: u8,
    x: u32,
    y: u32,
}

impl TileCoord {
    /// Validate a coordinate triple: `z <= 26` and `x, y < 2^z`.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self> {
        if z > MAX_ZOOM {
            return Err(Error::OutOfRange(format!(
                "zoom {z} exceeds maximum {MAX_ZOOM}"
            )));
        }
        let dim = 1u64 << z;
        if u64::from(x) >= dim || u64::from(y) >= dim {
            return Err(Error::OutOfRange(format!(
                "coordinates ({x}, {y}) do not fit a {dim}x{dim} grid at zoom {z}"
            )));
        }
        Ok(Self { z, x, y })
    }

    /// Zoom level.
    #[must_use]
    pub const fn z(&self) -> u8 {
        self.z
    }

    /// Column.
    #[must_use]
    pub const fn x(&self) -> u32 {
        self.x
    }

    /// Row.
    #[must_use]
    pub const fn y(&self) -> u32 {
        self.y
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl From<TileCoord> for TileId {
    fn from(coord: TileCoord) -> Self {
        // xy2h rejects order 0, so the single zoom-0 tile maps directly.
        if coord.z == 0 {
            return Self(0);
        }
        let base = PYRAMID_SIZE_BY_ZOOM[usize::from(coord.z)];
        Self(base + fast_hilbert::xy2h(coord.x, coord.y, coord.z))
    }
}

impl From<TileId> for TileCoord {
    fn from(id: TileId) -> Self {
        if id.0 == 0 {
            return Self { z: 0, x: 0, y: 0 };
        }
        // Zoom is the last level whose base id is <= the id.
        let z = PYRAMID_SIZE_BY_ZOOM.partition_point(|&base| base <= id.0) - 1;
        let rel = id.0 - PYRAMID_SIZE_BY_ZOOM[z];
        #[expect(clippy::cast_possible_truncation)]
        let z = z as u8;
        let (x, y) = fast_hilbert::h2xy(rel, z);
        Self { z, x, y }
    }
}

/// Ids covered by zoom `z`, as a half-open range.
pub(crate) fn zoom_id_range(z: u8) -> std::ops::Range<u64> {
    let z = usize::from(z);
    PYRAMID_SIZE_BY_ZOOM[z]..PYRAMID_SIZE_BY_ZOOM[z + 1]
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn tile_id(z: u8, x: u32, y: u32) -> u64 {
        TileId::from(TileCoord::new(z, x, y).unwrap()).value()
    }

    #[test]
    fn pyramid_is_cumulative() {
        let mut size_at_level = 0u64;
        for (z, &base) in PYRAMID_SIZE_BY_ZOOM.iter().enumerate() {
            assert_eq!(base, size_at_level, "invalid base at zoom {z}");
            size_at_level += 4u64.pow(z as u32);
        }
    }

    #[rstest]
    #[case(0, 0, 0, 0)]
    #[case(1, 0, 0, 1)]
    #[case(1, 1, 0, 4)]
    #[case(2, 1, 3, 11)]
    #[case(3, 3, 0, 26)]
    #[case(20, 0, 0, 366503875925)]
    #[case(26, 0, 0, 1501199875790165)]
    fn known_ids(#[case] z: u8, #[case] x: u32, #[case] y: u32, #[case] expected: u64) {
        assert_eq!(tile_id(z, x, y), expected);
    }

    #[test]
    fn round_trip_all_ids_through_zoom_three() {
        for id in 0..85 {
            let tile_id = TileId::new(id).unwrap();
            let coord = TileCoord::from(tile_id);
            assert_eq!(
                TileId::from(coord),
                tile_id,
                "round trip failed for id {id} ({coord})"
            );
        }
    }

    #[test]
    fn round_trip_spot_checks_at_depth() {
        for (z, x, y) in [
            (10u8, 512u32, 31u32),
            (20, 1 << 19, (1 << 20) - 1),
            (26, (1 << 26) - 1, 0),
        ] {
            let coord = TileCoord::new(z, x, y).unwrap();
            let back = TileCoord::from(TileId::from(coord));
            assert_eq!(back, coord);
        }
    }

    #[test]
    fn rejects_out_of_domain() {
        assert!(matches!(
            TileCoord::new(27, 0, 0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            TileCoord::new(3, 8, 0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            TileCoord::new(3, 0, 8),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            TileId::new(MAX_TILE_ID + 1),
            Err(Error::OutOfRange(_))
        ));
        assert!(TileId::new(MAX_TILE_ID).is_ok());
    }

    #[test]
    fn zoom_ranges_partition_the_id_space() {
        assert_eq!(zoom_id_range(0), 0..1);
        assert_eq!(zoom_id_range(1), 1..5);
        assert_eq!(zoom_id_range(3), 21..85);
        assert_eq!(zoom_id_range(26).end, MAX_TILE_ID + 1);
    }
}
