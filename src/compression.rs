use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZstdDecoder};
use bytes::Bytes;
use tokio::io::AsyncReadExt as _;

use crate::error::{Error, Result};
use crate::pool::ByteBufferPool;

/// Compression algorithms recognized by the archive format, for both the
/// internal (directory/metadata) and tile-data regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// The archive did not declare an algorithm.
    Unknown,
    /// Uncompressed.
    None,
    /// Gzip.
    Gzip,
    /// Brotli.
    Brotli,
    /// Zstandard.
    Zstd,
}

impl TryFrom<u8> for Compression {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::Unknown),
            1 => Ok(Compression::None),
            2 => Ok(Compression::Gzip),
            3 => Ok(Compression::Brotli),
            4 => Ok(Compression::Zstd),
            _ => Err(Error::InvalidHeader("unrecognized compression byte")),
        }
    }
}

impl From<Compression> for u8 {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Unknown => 0,
            Compression::None => 1,
            Compression::Gzip => 2,
            Compression::Brotli => 3,
            Compression::Zstd => 4,
        }
    }
}

/// Decompress `input` into `out`, appending. `wrap` converts codec I/O
/// failures into the caller's error kind (tiles report [`Error::CorruptTile`],
/// directories [`Error::InvalidDirectory`]).
pub(crate) async fn decompress_into<F>(
    compression: Compression,
    input: &[u8],
    out: &mut Vec<u8>,
    wrap: F,
) -> Result<()>
where
    F: FnOnce(std::io::Error) -> Error,
{
    let result = match compression {
        Compression::None => {
            out.extend_from_slice(input);
            return Ok(());
        }
        Compression::Gzip => GzipDecoder::new(input).read_to_end(out).await,
        Compression::Brotli => BrotliDecoder::new(input).read_to_end(out).await,
        Compression::Zstd => ZstdDecoder::new(input).read_to_end(out).await,
        Compression::Unknown => {
            return Err(Error::UnsupportedCompression(Compression::Unknown));
        }
    };
    result.map(|_| ()).map_err(wrap)
}

/// Decompress a tile blob, staging through pool scratch so repeated calls
/// do not regrow a fresh vector each time.
pub(crate) async fn decompress_tile(
    compression: Compression,
    input: Bytes,
    pool: &ByteBufferPool,
) -> Result<Bytes> {
    if compression == Compression::None {
        return Ok(input);
    }

    let mut scratch = pool.scratch(input.len().saturating_mul(4));
    let out = scratch.as_mut_vec();
    out.clear();
    decompress_into(compression, &input, out, Error::CorruptTile).await?;
    Ok(Bytes::copy_from_slice(out))
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn wire_values_round_trip() {
        for value in 0u8..=4 {
            let compression = Compression::try_from(value).unwrap();
            assert_eq!(u8::from(compression), value);
        }
        assert!(Compression::try_from(5).is_err());
    }

    #[tokio::test]
    async fn gzip_round_trip() {
        let payload = b"some tile payload".repeat(100);
        let pool = ByteBufferPool::default();

        let out = decompress_tile(Compression::Gzip, gzip(&payload).into(), &pool)
            .await
            .unwrap();
        assert_eq!(out, Bytes::from(payload));
    }

    #[tokio::test]
    async fn none_is_pass_through() {
        let pool = ByteBufferPool::default();
        let input = Bytes::from_static(b"raw");
        let out = decompress_tile(Compression::None, input.clone(), &pool)
            .await
            .unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn truncated_gzip_is_corrupt() {
        let pool = ByteBufferPool::default();
        let mut compressed = gzip(b"payload");
        compressed.truncate(compressed.len() / 2);

        let err = decompress_tile(Compression::Gzip, compressed.into(), &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CorruptTile(_)));
    }

    #[tokio::test]
    async fn unknown_compression_is_rejected() {
        let mut out = Vec::new();
        let err = decompress_into(Compression::Unknown, b"x", &mut out, Error::CorruptTile)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedCompression(Compression::Unknown)
        ));
    }
}
