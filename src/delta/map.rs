//! Per-volume delta map
//!
//! A packed bitmap with one bit per chunk, OR-accumulated between
//! sends and zeroed only after a send commits. Bit `k % 8` of byte
//! `k / 8` covers chunk `k` (low-order bit first within each byte).
//!
//! All mutation happens through a `-tmp` sibling of the base file;
//! renaming `-tmp` over the base is the commit point. A `-tmp` file
//! found at startup supersedes the base (it holds a superset of the
//! accumulated changes from an interrupted run).

use crate::error::{IoResultExt, Result};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Handle to a volume's delta map files
#[derive(Debug, Clone)]
pub struct DeltaMap {
    path: PathBuf,
}

impl DeltaMap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the committed map
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the in-progress sibling
    pub fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push("-tmp");
        PathBuf::from(os)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn tmp_exists(&self) -> bool {
        self.tmp_path().exists()
    }

    /// Create a zeroed map of `bytes` length, discarding any previous
    /// state. Used after a committed send and on first monitoring.
    pub fn initialize(&self, bytes: u64) -> Result<()> {
        for path in [self.path.clone(), self.tmp_path()] {
            if path.exists() {
                std::fs::remove_file(&path).with_path(&path)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .with_path(&self.path)?;
        file.set_len(bytes).with_path(&self.path)?;
        Ok(())
    }

    /// Adopt a leftover `-tmp` map from an interrupted run. Returns
    /// true if one was recovered.
    pub fn recover(&self) -> Result<bool> {
        let tmp = self.tmp_path();
        if tmp.exists() {
            std::fs::rename(&tmp, &self.path).with_path(&tmp)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Start accumulating into the `-tmp` sibling: the base map is
    /// renamed aside and resized (zero-extended or truncated) for the
    /// current volume size.
    pub fn begin_update(&self, bytes: u64) -> Result<MapHandle> {
        let tmp = self.tmp_path();
        std::fs::rename(&self.path, &tmp).with_path(&self.path)?;
        MapHandle::open(&tmp, Some(bytes))
    }

    /// Open the in-progress `-tmp` map (a send reads chunk bits from it)
    pub fn open_tmp(&self) -> Result<MapHandle> {
        MapHandle::open(&self.tmp_path(), None)
    }

    /// Open the committed map read-write, resizing it first. Used by
    /// `diff --remap` which writes into the live map directly.
    pub fn open_base(&self, bytes: u64) -> Result<MapHandle> {
        MapHandle::open(&self.path, Some(bytes))
    }

    /// Commit: rename `-tmp` over the base
    pub fn commit(&self) -> Result<()> {
        let tmp = self.tmp_path();
        std::fs::rename(&tmp, &self.path).with_path(&tmp)
    }
}

/// A memory-mapped view of one delta map file
pub struct MapHandle {
    mmap: MmapMut,
    len: usize,
}

impl MapHandle {
    fn open(path: &Path, resize_to: Option<u64>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_path(path)?;
        if let Some(bytes) = resize_to {
            file.set_len(bytes).with_path(path)?;
        }
        let len = file.metadata().with_path(path)?.len() as usize;
        let mmap = unsafe { MmapMut::map_mut(&file) }.with_path(path)?;
        Ok(Self { mmap, len })
    }

    /// Map length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether chunk `k` is marked dirty
    pub fn get(&self, chunk: u64) -> bool {
        let byte = (chunk / 8) as usize;
        byte < self.len && self.mmap[byte] & (1 << (chunk % 8)) != 0
    }

    /// Mark chunk `k` dirty
    pub fn set(&mut self, chunk: u64) {
        let byte = (chunk / 8) as usize;
        if byte < self.len {
            self.mmap[byte] |= 1 << (chunk % 8);
        }
    }

    /// Mark every chunk intersecting the byte range `[begin, end)`
    pub fn mark_byte_range(&mut self, begin: u64, end: u64, chunksize: u64) {
        if end <= begin {
            return;
        }
        let first = begin / chunksize;
        let last = (end - 1) / chunksize;
        for chunk in first..=last {
            self.set(chunk);
        }
    }

    /// True if no bit is set
    pub fn is_clear(&self) -> bool {
        self.mmap.iter().all(|b| *b == 0)
    }

    /// Flush dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
