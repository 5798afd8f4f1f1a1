//! Thin-delta translator
//!
//! Consumes the XML diff emitted by `thin_delta` between the `.tick`
//! and `.tock` snapshots and folds it into the delta map. The diff is
//! expressed in thin blocks of `data_block_size` × 512 bytes; the
//! archive chunk size is independent of it.
//!
//! `different` and `right_only` ranges are newly written data;
//! `left_only` ranges were unmapped (freed) but are still marked
//! dirty so the next send re-reads them from the snapshot, which
//! presents zeros. `same` ranges are ignored.

use crate::chunk::DISK_BLOCK_SIZE;
use crate::delta::map::MapHandle;
use crate::error::{Result, VaultError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Byte counts accumulated while translating one diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Bytes covered by `different` and `right_only` ranges
    pub new_bytes: u64,
    /// Bytes covered by `left_only` (discarded) ranges
    pub freed_bytes: u64,
}

impl DeltaStats {
    /// Whether the diff contained any change at all
    pub fn changed(&self) -> bool {
        self.new_bytes + self.freed_bytes > 0
    }
}

fn attr_u64(element: &BytesStart<'_>, name: &str) -> Result<Option<u64>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| VaultError::Lvm(format!("Bad thin_delta XML: {}", e)))?;
        if attr.key.as_ref() == name.as_bytes() {
            let text = String::from_utf8_lossy(&attr.value).to_string();
            let value = text.parse::<u64>().map_err(|_| {
                VaultError::Lvm(format!("Bad thin_delta attribute {}='{}'", name, text))
            })?;
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Fold one `thin_delta` XML document into the (in-progress) delta
/// map and return the change statistics
pub fn translate_delta(xml: &str, map: &mut MapHandle, chunksize: u64) -> Result<DeltaStats> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut data_block_size: Option<u64> = None;
    let mut stats = DeltaStats::default();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| VaultError::Lvm(format!("Bad thin_delta XML: {}", e)))?;
        let element = match &event {
            Event::Start(e) | Event::Empty(e) => e.clone(),
            Event::Eof => break,
            _ => continue,
        };
        let tag = element.name();
        let tag = tag.as_ref();

        if data_block_size.is_none() {
            if let Some(dbs) = attr_u64(&element, "data_block_size")? {
                data_block_size = Some(dbs);
            }
        }

        let dirty = match tag {
            b"different" | b"right_only" => true,
            b"left_only" => true,
            b"same" => false,
            _ => continue,
        };
        let freed = tag == b"left_only";

        let dbs = data_block_size.ok_or_else(|| {
            VaultError::Lvm("thin_delta XML missing data_block_size".to_string())
        })?;
        let begin = attr_u64(&element, "begin")?.ok_or_else(|| {
            VaultError::Lvm("thin_delta range missing 'begin'".to_string())
        })?;
        let length = attr_u64(&element, "length")?.ok_or_else(|| {
            VaultError::Lvm("thin_delta range missing 'length'".to_string())
        })?;

        let byte_begin = begin * dbs * DISK_BLOCK_SIZE;
        let byte_len = length * dbs * DISK_BLOCK_SIZE;
        if freed {
            stats.freed_bytes += byte_len;
        } else if dirty {
            stats.new_bytes += byte_len;
        }
        if dirty {
            map.mark_byte_range(byte_begin, byte_begin + byte_len, chunksize);
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::map::DeltaMap;
    use tempfile::TempDir;

    const CHUNK: u64 = 65536;

    fn fresh_map(dir: &TempDir) -> (DeltaMap, MapHandle) {
        let map = DeltaMap::new(dir.path().join("deltamap"));
        map.initialize(64).unwrap();
        let handle = map.open_base(64).unwrap();
        (map, handle)
    }

    #[test]
    fn test_different_marks_chunks() {
        let dir = TempDir::new().unwrap();
        let (_map, mut handle) = fresh_map(&dir);
        // dbs=128 thin blocks of 512 bytes = 64 KiB per thin block;
        // begin=1 length=2 covers bytes [64 KiB, 192 KiB)
        let xml = r#"<superblock data_block_size="128">
            <diff left="1" right="2">
              <same begin="0" length="1"/>
              <different begin="1" length="2"/>
            </diff>
          </superblock>"#;
        let stats = translate_delta(xml, &mut handle, CHUNK).unwrap();
        assert_eq!(stats.new_bytes, 2 * 128 * 512);
        assert_eq!(stats.freed_bytes, 0);
        assert!(stats.changed());
        assert!(!handle.get(0));
        assert!(handle.get(1));
        assert!(handle.get(2));
        assert!(!handle.get(3));
    }

    #[test]
    fn test_left_only_marked_dirty_and_counted_freed() {
        let dir = TempDir::new().unwrap();
        let (_map, mut handle) = fresh_map(&dir);
        let xml = r#"<superblock data_block_size="128">
            <diff><left_only begin="0" length="1"/></diff>
          </superblock>"#;
        let stats = translate_delta(xml, &mut handle, CHUNK).unwrap();
        assert_eq!(stats.freed_bytes, 128 * 512);
        assert_eq!(stats.new_bytes, 0);
        assert!(handle.get(0));
    }

    #[test]
    fn test_small_thin_blocks_share_chunk() {
        let dir = TempDir::new().unwrap();
        let (_map, mut handle) = fresh_map(&dir);
        // dbs=16 → 8 KiB thin blocks; blocks 2..4 stay inside chunk 0
        let xml = r#"<superblock data_block_size="16">
            <diff><right_only begin="2" length="2"/></diff>
          </superblock>"#;
        let stats = translate_delta(xml, &mut handle, CHUNK).unwrap();
        assert_eq!(stats.new_bytes, 2 * 16 * 512);
        assert!(handle.get(0));
        assert!(!handle.get(1));
    }

    #[test]
    fn test_same_only_is_no_change() {
        let dir = TempDir::new().unwrap();
        let (_map, mut handle) = fresh_map(&dir);
        let xml = r#"<superblock data_block_size="128">
            <diff><same begin="0" length="100"/></diff>
          </superblock>"#;
        let stats = translate_delta(xml, &mut handle, CHUNK).unwrap();
        assert!(!stats.changed());
        assert!(handle.is_clear());
    }

    #[test]
    fn test_missing_data_block_size_rejected() {
        let dir = TempDir::new().unwrap();
        let (_map, mut handle) = fresh_map(&dir);
        let xml = r#"<diff><different begin="0" length="1"/></diff>"#;
        assert!(translate_delta(xml, &mut handle, CHUNK).is_err());
    }
}
