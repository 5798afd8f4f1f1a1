//! Chunk addressing
//!
//! A chunk is a fixed-size byte range of a volume identified by its
//! starting offset, rendered as a fixed-width hexadecimal address.
//! Chunk files are stored in a two-level hash-split tree so no leaf
//! directory holds more than 2048 entries.

use crate::error::{Result, VaultError};

/// Disk block size used by LVM thin tools
pub const DISK_BLOCK_SIZE: u64 = 512;

/// LVM minimum allocation granularity in disk blocks (128 blocks = 64 KiB)
pub const LVM_BLOCK_FACTOR: u64 = 128;

/// Default archive chunk size (one LVM allocation unit, 64 KiB)
pub const DEFAULT_CHUNK_SIZE: u64 = LVM_BLOCK_FACTOR * DISK_BLOCK_SIZE;

/// Largest supported chunk size (16 MiB)
pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Number of hex digits in a chunk address (64-bit address space)
pub const ADDRESS_DIGITS: usize = 16;

/// Digits kept in the leaf file name; the leading 9 form the subdirectory.
/// A 9+7 split allows at most 2048 chunk files per leaf directory.
pub const ADDRESS_TAIL_DIGITS: usize = 7;

/// Validate a chunk size from `--chunk-factor`
pub fn validate_chunk_size(chunksize: u64) -> Result<()> {
    if chunksize == 0 || chunksize % DEFAULT_CHUNK_SIZE != 0 {
        return Err(VaultError::config(format!(
            "Chunk size must be a positive multiple of {} bytes",
            DEFAULT_CHUNK_SIZE
        )));
    }
    if chunksize > MAX_CHUNK_SIZE {
        return Err(VaultError::config(format!(
            "Requested chunk size {} not supported (max {})",
            chunksize, MAX_CHUNK_SIZE
        )));
    }
    Ok(())
}

/// Render a chunk address as the zero-padded hex form used in manifests
/// and file names, e.g. `x000000000001f000`.
pub fn format_address(addr: u64) -> String {
    format!("x{:016x}", addr)
}

/// Parse a manifest address field (`x` + 16 hex digits) back to bytes
pub fn parse_address(field: &str) -> Result<u64> {
    let hex = field
        .strip_prefix('x')
        .ok_or_else(|| VaultError::Manifest(format!("Bad address field: {}", field)))?;
    if hex.len() != ADDRESS_DIGITS {
        return Err(VaultError::Manifest(format!("Bad address width: {}", field)));
    }
    u64::from_str_radix(hex, 16)
        .map_err(|_| VaultError::Manifest(format!("Bad address field: {}", field)))
}

/// Relative path of a chunk file inside its session directory:
/// `<addr[..9]>/x<addr>`
pub fn chunk_rel_path(addr: u64) -> String {
    let hex = format!("{:016x}", addr);
    let split = ADDRESS_DIGITS - ADDRESS_TAIL_DIGITS;
    format!("{}/x{}", &hex[..split], hex)
}

/// Starting address of the last chunk of a volume
pub fn last_chunk_addr(volsize: u64, chunksize: u64) -> u64 {
    (volsize - 1) - ((volsize - 1) % chunksize)
}

/// Number of bytes in the delta map for a volume of `volsize` bytes
pub fn map_bytes(volsize: u64, chunksize: u64) -> u64 {
    volsize / chunksize / 8 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_size() {
        assert_eq!(DEFAULT_CHUNK_SIZE, 64 * 1024);
        assert!(validate_chunk_size(DEFAULT_CHUNK_SIZE).is_ok());
        assert!(validate_chunk_size(4 * DEFAULT_CHUNK_SIZE).is_ok());
        assert!(validate_chunk_size(MAX_CHUNK_SIZE).is_ok());
    }

    #[test]
    fn test_invalid_chunk_sizes() {
        assert!(validate_chunk_size(0).is_err());
        assert!(validate_chunk_size(4096).is_err());
        assert!(validate_chunk_size(DEFAULT_CHUNK_SIZE + 1).is_err());
        assert!(validate_chunk_size(MAX_CHUNK_SIZE * 2).is_err());
    }

    #[test]
    fn test_format_parse_roundtrip() {
        for addr in [0u64, 0x1f000, u64::MAX - 0xffff] {
            let s = format_address(addr);
            assert_eq!(s.len(), 1 + ADDRESS_DIGITS);
            assert_eq!(parse_address(&s).unwrap(), addr);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_address("000000000001f000").is_err());
        assert!(parse_address("x1f000").is_err());
        assert!(parse_address("xzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_chunk_rel_path_split() {
        // 9 leading digits form the subdirectory, full address in the leaf
        assert_eq!(chunk_rel_path(0x1f000), "000000000/x000000000001f000");
        assert_eq!(
            chunk_rel_path(u64::MAX),
            "fffffffff/xffffffffffffffff"
        );
    }

    #[test]
    fn test_last_chunk_addr() {
        let c = DEFAULT_CHUNK_SIZE;
        assert_eq!(last_chunk_addr(c, c), 0);
        assert_eq!(last_chunk_addr(c + 1, c), c);
        assert_eq!(last_chunk_addr(2 * 1024 * 1024, c), 2 * 1024 * 1024 - c);
        assert_eq!(last_chunk_addr(2 * 1024 * 1024 + 5, c), 2 * 1024 * 1024);
    }

    #[test]
    fn test_map_bytes() {
        let c = DEFAULT_CHUNK_SIZE;
        // 256 MiB volume = 4096 chunks = 512 bytes + 1
        assert_eq!(map_bytes(256 * 1024 * 1024, c), 513);
        assert_eq!(map_bytes(0, c), 1);
    }
}
