//! Gzip compression for stored response bodies

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::CompressionError;

type Result<T> = std::result::Result<T, CompressionError>;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `data` starts with a gzip header.
pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Gzip-compress `data`.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CompressionError::Io(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CompressionError::Io(e.to_string()))
}

/// Decompress gzip `data`. Anything that is not a complete gzip stream is
/// reported as corrupt.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if !is_compressed(data) {
        return Err(CompressionError::Corrupt("missing gzip header".to_string()));
    }

    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::Corrupt(e.to_string()))?;
    Ok(out)
}

/// Legacy read path for tables that held plain bodies before compression
/// was switched on. Bytes without a gzip header are returned unchanged;
/// bytes with one must still decode.
pub fn decompress_or_plain(data: &[u8]) -> Result<Vec<u8>> {
    if is_compressed(data) {
        decompress(data)
    } else {
        log::warn!(
            "Stored body ({} bytes) is not gzip; reading as plain legacy data",
            data.len()
        );
        Ok(data.to_vec())
    }
}
