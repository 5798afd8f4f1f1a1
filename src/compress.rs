//! Chunk compression
//!
//! Chunks are compressed with zlib before hashing and archival; the
//! manifest hash covers the compressed payload. The level is an
//! archive-wide setting fixed at `arch-init` time.

use crate::error::{Result, VaultError};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Default zlib level used by `arch-init` when none is given
pub const DEFAULT_LEVEL: u32 = 4;

/// Validate an archive compression spec (`zlib` is the only codec)
pub fn validate_algorithm(name: &str) -> Result<()> {
    match name {
        "zlib" => Ok(()),
        other => Err(VaultError::config(format!(
            "Invalid compression spec: {}",
            other
        ))),
    }
}

/// Compress one chunk payload
pub fn compress_chunk(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::new(level.min(9)),
    );
    encoder
        .write_all(data)
        .map_err(|e| VaultError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| VaultError::Compression(e.to_string()))
}

/// Decompress one chunk payload, refusing output longer than
/// `max_len` (a corrupt stream must not balloon memory)
pub fn decompress_chunk(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take(max_len as u64 + 1);
    let mut out = Vec::with_capacity(max_len.min(1 << 20));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| VaultError::Compression(e.to_string()))?;
    if out.len() > max_len {
        return Err(VaultError::Compression(format!(
            "Decompressed beyond {} bytes",
            max_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data = b"thin volumes are mostly air".repeat(1000);
        let packed = compress_chunk(&data, DEFAULT_LEVEL).unwrap();
        assert!(packed.len() < data.len());
        let unpacked = decompress_chunk(&packed, data.len()).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn test_zero_chunk_compresses_small() {
        let zeros = vec![0u8; 65536];
        let packed = compress_chunk(&zeros, DEFAULT_LEVEL).unwrap();
        assert!(packed.len() < 256);
    }

    #[test]
    fn test_decompress_length_guard() {
        let data = vec![7u8; 65536];
        let packed = compress_chunk(&data, DEFAULT_LEVEL).unwrap();
        assert!(decompress_chunk(&packed, 1024).is_err());
    }

    #[test]
    fn test_validate_algorithm() {
        assert!(validate_algorithm("zlib").is_ok());
        assert!(validate_algorithm("zstd").is_err());
    }
}
