//! Deduplication index
//!
//! An in-memory map from chunk hash to the first `(session, address)`
//! at which that hash appeared. The table is sharded by the top 16
//! bits of the hash; each shard holds packed 32-byte hashes and a
//! parallel vector of back-references into a companion spill file of
//! fixed-width `(session_index, address)` records, keeping the
//! resident footprint at the hashes themselves.
//!
//! Session indices are positions in the archive-wide
//! sessions-by-localtime list and are encoded as 32 bits.

use crate::archive::set::SessionRef;
use crate::archive::Manifest;
use crate::chunk::chunk_rel_path;
use crate::error::{IoResultExt, Result, VaultError};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Width of a chunk hash (SHA-256)
pub const HASH_BYTES: usize = 32;

/// Spill-file record: 4-byte session index + 8-byte address, big-endian
const RECORD_BYTES: u64 = 12;

const SHARD_COUNT: usize = 1 << 16;

#[derive(Default)]
struct Shard {
    /// Packed 32-byte hashes
    hashes: Vec<u8>,
    /// Record number in the spill file, parallel to `hashes`
    refs: Vec<u32>,
}

/// Map from chunk hash to first occurrence
pub struct DedupIndex {
    shards: Vec<Shard>,
    spill: File,
    count: u32,
    /// Highest session index that may be recorded
    session_limit: u32,
}

impl DedupIndex {
    /// Create an empty index with its spill file at `spill_path`.
    /// `volume_count` reserves headroom below the session-index bound.
    pub fn create(spill_path: &Path, volume_count: usize) -> Result<Self> {
        let spill = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(spill_path)
            .with_path(spill_path)?;
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, Shard::default);
        Ok(Self {
            shards,
            spill,
            count: 0,
            session_limit: u32::MAX - volume_count as u32 - 1,
        })
    }

    /// Number of indexed chunks
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn shard_of(hash: &[u8; HASH_BYTES]) -> usize {
        u16::from_be_bytes([hash[0], hash[1]]) as usize
    }

    /// First `(session_index, address)` recorded for `hash`, if any
    pub fn lookup(&self, hash: &[u8; HASH_BYTES]) -> Result<Option<(u32, u64)>> {
        let shard = &self.shards[Self::shard_of(hash)];
        for (slot, candidate) in shard.hashes.chunks_exact(HASH_BYTES).enumerate() {
            if candidate == hash {
                let mut record = [0u8; RECORD_BYTES as usize];
                self.spill
                    .read_exact_at(&mut record, shard.refs[slot] as u64 * RECORD_BYTES)
                    .with_path("dedup spill")?;
                let session_idx = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
                let addr = u64::from_be_bytes([
                    record[4], record[5], record[6], record[7], record[8], record[9],
                    record[10], record[11],
                ]);
                return Ok(Some((session_idx, addr)));
            }
        }
        Ok(None)
    }

    /// Record the first occurrence of `hash`; a duplicate is a no-op.
    /// Returns true if the hash was newly inserted.
    pub fn insert(&mut self, hash: &[u8; HASH_BYTES], session_idx: u32, addr: u64) -> Result<bool> {
        if session_idx > self.session_limit {
            // sessions beyond the index bound are simply not indexed
            return Ok(false);
        }
        if self.lookup(hash)?.is_some() {
            return Ok(false);
        }
        let mut record = [0u8; RECORD_BYTES as usize];
        record[..4].copy_from_slice(&session_idx.to_be_bytes());
        record[4..].copy_from_slice(&addr.to_be_bytes());
        self.spill
            .write_all_at(&record, self.count as u64 * RECORD_BYTES)
            .with_path("dedup spill")?;
        let shard = &mut self.shards[Self::shard_of(hash)];
        shard.hashes.extend_from_slice(hash);
        shard.refs.push(self.count);
        self.count += 1;
        Ok(true)
    }

    /// Populate the index from archived manifests in chronological
    /// order, so the earliest occurrence of each hash wins.
    /// `sessions[i]` must be the session with global index `i`.
    pub fn build_from_manifests(
        &mut self,
        sessions: &[SessionRef],
        archive_root: &Path,
    ) -> Result<()> {
        for (session_idx, sref) in sessions.iter().enumerate() {
            let manifest_path = archive_root
                .join(&sref.volume)
                .join(&sref.session)
                .join("manifest");
            let manifest = Manifest::load(&manifest_path)?;
            for entry in &manifest.entries {
                if entry.is_zero() {
                    continue;
                }
                let hash = parse_hash(&entry.hash)?;
                self.insert(&hash, session_idx as u32, entry.addr)?;
            }
        }
        Ok(())
    }

    /// Produce the post-hoc link list for the helper's `dedup`
    /// command: one `src dest` path pair for every manifest entry
    /// whose hash matched an earlier entry at a different location.
    pub fn generate_link_list(
        &mut self,
        sessions: &[SessionRef],
        archive_root: &Path,
    ) -> Result<Vec<String>> {
        let mut pairs = Vec::new();
        for (session_idx, sref) in sessions.iter().enumerate() {
            let manifest_path = archive_root
                .join(&sref.volume)
                .join(&sref.session)
                .join("manifest");
            let manifest = Manifest::load(&manifest_path)?;
            for entry in &manifest.entries {
                if entry.is_zero() {
                    continue;
                }
                let hash = parse_hash(&entry.hash)?;
                if self.insert(&hash, session_idx as u32, entry.addr)? {
                    continue;
                }
                let (dd_idx, dd_addr) = match self.lookup(&hash)? {
                    Some(hit) => hit,
                    None => continue,
                };
                if dd_idx as usize == session_idx && dd_addr == entry.addr {
                    continue;
                }
                let dd = &sessions[dd_idx as usize];
                pairs.push(format!(
                    "{}/{}/{} {}/{}/{}",
                    dd.volume,
                    dd.session,
                    chunk_rel_path(dd_addr),
                    sref.volume,
                    sref.session,
                    chunk_rel_path(entry.addr),
                ));
            }
        }
        Ok(pairs)
    }
}

/// Parse a manifest hash field into raw bytes
pub fn parse_hash(hash_hex: &str) -> Result<[u8; HASH_BYTES]> {
    let bytes = hex::decode(hash_hex)
        .map_err(|_| VaultError::Manifest(format!("Bad hash: {}", hash_hex)))?;
    bytes
        .try_into()
        .map_err(|_| VaultError::Manifest(format!("Bad hash width: {}", hash_hex)))
}

/// Session directory name rendered for a link target, with the
/// in-flight `-tmp` suffix when the match lives in the session
/// currently being written
pub fn link_session_dir(sref: &SessionRef, current: Option<&SessionRef>) -> String {
    if current == Some(sref) {
        format!("{}-tmp", sref.session)
    } else {
        sref.session.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::SESSION_PREFIX;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn hash_of(data: &[u8]) -> [u8; HASH_BYTES] {
        Sha256::digest(data).into()
    }

    #[test]
    fn test_insert_lookup() {
        let dir = TempDir::new().unwrap();
        let mut idx = DedupIndex::create(&dir.path().join("spill"), 1).unwrap();
        let h = hash_of(b"chunk-a");
        assert_eq!(idx.lookup(&h).unwrap(), None);
        assert!(idx.insert(&h, 0, 65536).unwrap());
        assert_eq!(idx.lookup(&h).unwrap(), Some((0, 65536)));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut idx = DedupIndex::create(&dir.path().join("spill"), 1).unwrap();
        let h = hash_of(b"chunk-a");
        assert!(idx.insert(&h, 0, 0).unwrap());
        assert!(!idx.insert(&h, 5, 131072).unwrap());
        // earliest occurrence wins
        assert_eq!(idx.lookup(&h).unwrap(), Some((0, 0)));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_many_hashes_across_shards() {
        let dir = TempDir::new().unwrap();
        let mut idx = DedupIndex::create(&dir.path().join("spill"), 1).unwrap();
        let hashes: Vec<_> = (0u32..500).map(|i| hash_of(&i.to_be_bytes())).collect();
        for (i, h) in hashes.iter().enumerate() {
            assert!(idx.insert(h, 0, i as u64 * 65536).unwrap());
        }
        assert_eq!(idx.len(), 500);
        for (i, h) in hashes.iter().enumerate() {
            assert_eq!(idx.lookup(h).unwrap(), Some((0, i as u64 * 65536)));
        }
    }

    fn write_manifest(root: &Path, volume: &str, session: &str, lines: &str) {
        let dir = root.join(volume).join(session);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest"), lines).unwrap();
    }

    fn sref(volume: &str, session: &str) -> SessionRef {
        SessionRef {
            volume: volume.into(),
            session: session.into(),
            localtime: session.trim_start_matches(SESSION_PREFIX).into(),
        }
    }

    #[test]
    fn test_build_from_manifests_earliest_wins() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let h = hex::encode(hash_of(b"shared"));
        write_manifest(
            root,
            "root",
            "S_20240101-000000",
            &format!("{} x0000000000000000\n", h),
        );
        write_manifest(
            root,
            "home",
            "S_20240102-000000",
            &format!("0 x0000000000000000\n{} x0000000000010000\n", h),
        );
        let sessions = vec![
            sref("root", "S_20240101-000000"),
            sref("home", "S_20240102-000000"),
        ];
        let mut idx = DedupIndex::create(&root.join("spill"), 2).unwrap();
        idx.build_from_manifests(&sessions, root).unwrap();
        assert_eq!(idx.len(), 1);
        let parsed = parse_hash(&h).unwrap();
        assert_eq!(idx.lookup(&parsed).unwrap(), Some((0, 0)));
    }

    #[test]
    fn test_generate_link_list() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let h = hex::encode(hash_of(b"shared"));
        write_manifest(
            root,
            "root",
            "S_20240101-000000",
            &format!("{} x0000000000000000\n", h),
        );
        write_manifest(
            root,
            "home",
            "S_20240102-000000",
            &format!("{} x0000000000010000\n", h),
        );
        let sessions = vec![
            sref("root", "S_20240101-000000"),
            sref("home", "S_20240102-000000"),
        ];
        let mut idx = DedupIndex::create(&root.join("spill"), 2).unwrap();
        let pairs = idx.generate_link_list(&sessions, root).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(
            pairs[0],
            "root/S_20240101-000000/000000000/x0000000000000000 \
             home/S_20240102-000000/000000000/x0000000000010000"
        );
    }

    #[test]
    fn test_link_session_dir_tmp_suffix() {
        let current = sref("root", "S_20240103-000000");
        assert_eq!(
            link_session_dir(&current, Some(&current)),
            "S_20240103-000000-tmp"
        );
        let older = sref("root", "S_20240101-000000");
        assert_eq!(link_session_dir(&older, Some(&current)), "S_20240101-000000");
    }
}
