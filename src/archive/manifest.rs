//! Session manifests
//!
//! A manifest is the ordered list of `(hash, address)` pairs that
//! defines a session's content. Lines are exactly
//! `<sha256-hex|"0"> x<hex-address>`, strictly ascending by address.
//! The literal hash `0` denotes an all-zero chunk that was not sent.

use crate::chunk::{format_address, parse_address};
use crate::error::{IoResultExt, Result, VaultError};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::Path;

/// Marker hash for an all-zero chunk with no archived file
pub const ZERO_HASH: &str = "0";

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Lowercase hex SHA-256 of the compressed payload, or `"0"`
    pub hash: String,
    /// Chunk starting offset in the volume
    pub addr: u64,
}

impl ManifestEntry {
    /// Whether this entry denotes an unsent all-zero chunk
    pub fn is_zero(&self) -> bool {
        self.hash == ZERO_HASH
    }

    fn parse(line: &str, lineno: usize) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let (hash, addr) = match (fields.next(), fields.next(), fields.next()) {
            (Some(h), Some(a), None) => (h, a),
            _ => {
                return Err(VaultError::Manifest(format!(
                    "Bad manifest line {}: '{}'",
                    lineno + 1,
                    line
                )))
            }
        };
        Ok(Self {
            hash: hash.to_string(),
            addr: parse_address(addr)?,
        })
    }
}

impl std::fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.hash, format_address(self.addr))
    }
}

/// An ordered session manifest
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Entries in strictly ascending address order
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Load and validate a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let mut entries = Vec::new();
        let mut prev: Option<u64> = None;
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = ManifestEntry::parse(line, lineno)?;
            if let Some(p) = prev {
                if entry.addr <= p {
                    return Err(VaultError::Manifest(format!(
                        "Addresses not ascending at line {} in {}",
                        lineno + 1,
                        path.display()
                    )));
                }
            }
            prev = Some(entry.addr);
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Write the manifest to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "{}", entry);
        }
        std::fs::write(path, out).with_path(path)
    }
}

/// A manifest entry annotated with the session it came from, the unit
/// of the merge algorithms used by prune and receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedEntry {
    pub hash: String,
    pub addr: u64,
    pub session: String,
}

impl AnnotatedEntry {
    /// Whether this entry denotes an unsent all-zero chunk
    pub fn is_zero(&self) -> bool {
        self.hash == ZERO_HASH
    }
}

/// Load a session manifest with every entry annotated by session name
pub fn load_annotated(path: &Path, session: &str) -> Result<Vec<AnnotatedEntry>> {
    let manifest = Manifest::load(path)?;
    Ok(manifest
        .entries
        .into_iter()
        .map(|e| AnnotatedEntry {
            hash: e.hash,
            addr: e.addr,
            session: session.to_string(),
        })
        .collect())
}

/// Stable unique merge by address: the FIRST occurrence of each address
/// in the input wins, and the result is ordered by address. Callers
/// concatenate manifests newest-first, so the newest extant chunk
/// survives for every address.
pub fn merge_newest_wins<I>(inputs: I) -> Vec<AnnotatedEntry>
where
    I: IntoIterator<Item = AnnotatedEntry>,
{
    let mut by_addr: BTreeMap<u64, AnnotatedEntry> = BTreeMap::new();
    for entry in inputs {
        by_addr.entry(entry.addr).or_insert(entry);
    }
    by_addr.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ae(hash: &str, addr: u64, ses: &str) -> AnnotatedEntry {
        AnnotatedEntry {
            hash: hash.to_string(),
            addr,
            session: ses.to_string(),
        }
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest");
        let manifest = Manifest {
            entries: vec![
                ManifestEntry {
                    hash: ZERO_HASH.into(),
                    addr: 0,
                },
                ManifestEntry {
                    hash: "ab".repeat(32),
                    addr: 0x1f000,
                },
            ],
        };
        manifest.save(&path).unwrap();
        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.entries, manifest.entries);
        assert!(loaded.entries[0].is_zero());
    }

    #[test]
    fn test_manifest_line_format() {
        let entry = ManifestEntry {
            hash: ZERO_HASH.into(),
            addr: 0x1f000,
        };
        assert_eq!(entry.to_string(), "0 x000000000001f000");
    }

    #[test]
    fn test_load_rejects_unsorted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest");
        std::fs::write(
            &path,
            "0 x0000000000010000\n0 x0000000000000000\n",
        )
        .unwrap();
        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn test_merge_first_occurrence_wins() {
        // Newest session listed first: its chunk at addr 0 must win
        let merged = merge_newest_wins(vec![
            ae("aa", 0, "S_20240102-000000"),
            ae("bb", 65536, "S_20240102-000000"),
            ae("cc", 0, "S_20240101-000000"),
            ae("dd", 131072, "S_20240101-000000"),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].hash, "aa");
        assert_eq!(merged[0].session, "S_20240102-000000");
        assert_eq!(merged[1].addr, 65536);
        assert_eq!(merged[2].hash, "dd");
    }

    #[test]
    fn test_merge_orders_by_address() {
        let merged = merge_newest_wins(vec![
            ae("bb", 131072, "S_b"),
            ae("aa", 0, "S_b"),
        ]);
        assert_eq!(merged[0].addr, 0);
        assert_eq!(merged[1].addr, 131072);
    }
}
