//! Snapshot rotation
//!
//! Each volume carries at most two snapshots: `.tick`, the baseline
//! the delta map refers to, and `.tock`, a fresh read-only snapshot
//! taken at the start of each monitor or send. Rotation (removing
//! `.tick` and renaming `.tock` over it) is the single atomic commit
//! of a send; everything before it is recoverable.

use crate::archive::Volume;
use crate::delta::DeltaMap;
use crate::error::{IoResultExt, Result, VaultError};
use crate::lvm::{self, VolGroup};
use tracing::info;

/// Snapshot suffixes
pub const TICK_SUFFIX: &str = ".tick";
pub const TOCK_SUFFIX: &str = ".tock";

/// Name of a volume's baseline snapshot
pub fn tick_name(volume: &str) -> String {
    format!("{}{}", volume, TICK_SUFFIX)
}

/// Name of a volume's current snapshot
pub fn tock_name(volume: &str) -> String {
    format!("{}{}", volume, TOCK_SUFFIX)
}

/// Outcome of preparing one volume for monitor/send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepState {
    /// First time this volume is tracked: no delta yet, full send
    NewlyTracked,
    /// `.tick` and the delta map exist; a delta can be taken
    Ready,
}

/// Snapshot lifecycle driver for one volume group
pub struct Rotator<'a> {
    vgname: &'a str,
}

impl<'a> Rotator<'a> {
    pub fn new(vgname: &'a str) -> Self {
        Self { vgname }
    }

    /// Clean up artifacts of an interrupted run: stale `.tock`, an
    /// uncommitted `deltamap-tmp` (adopted as current), and any
    /// `S_*-tmp` session directories.
    pub fn recover(&self, vol: &Volume, vg: &VolGroup) -> Result<()> {
        if vg.lvs.contains_key(&tock_name(&vol.name)) {
            lvm::remove_lv(self.vgname, &tock_name(&vol.name))?;
        }
        let map = DeltaMap::new(vol.mapfile());
        if map.recover()? {
            info!(volume = %vol.name, "recovered uncommitted delta map");
        }
        for entry in std::fs::read_dir(&vol.path).with_path(&vol.path)? {
            let entry = entry.with_path(&vol.path)?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("S_") && name.ends_with("-tmp") {
                std::fs::remove_dir_all(entry.path()).with_path(entry.path())?;
            }
        }
        Ok(())
    }

    /// Establish the precondition table for a monitor/send: make the
    /// initial `.tick` for a never-tracked volume, reject a map
    /// without its baseline, then take a fresh `.tock`.
    pub fn prepare(&self, vol: &Volume, vg: &VolGroup, monitor_only: bool) -> Result<PrepState> {
        let tick = tick_name(&vol.name);
        let map = DeltaMap::new(vol.mapfile());

        let state = if !map.exists() {
            if !vol.sesnames.is_empty() {
                return Err(VaultError::SnapshotState {
                    volume: vol.name.clone(),
                    message: "sessions exist but no delta map".to_string(),
                });
            }
            if !monitor_only && !vg.lvs.contains_key(&tick) {
                lvm::create_snapshot(self.vgname, &vol.name, &tick)?;
                info!(volume = %vol.name, "initial snapshot created");
            }
            PrepState::NewlyTracked
        } else {
            if !vg.lvs.contains_key(&tick) {
                return Err(VaultError::SnapshotState {
                    volume: vol.name.clone(),
                    message: format!("delta map present but {} is missing", tick),
                });
            }
            PrepState::Ready
        };

        // a newly tracked volume needs no tock in monitor mode
        if !(monitor_only && state == PrepState::NewlyTracked) {
            lvm::create_snapshot(self.vgname, &vol.name, &tock_name(&vol.name))?;
        }
        Ok(state)
    }

    /// Commit or discard the current `.tock`. With `data_changed`,
    /// `.tick` is replaced by `.tock`; otherwise `.tock` is dropped
    /// and the baseline stands.
    pub fn rotate(&self, volume: &str, data_changed: bool) -> Result<()> {
        let tick = tick_name(volume);
        let tock = tock_name(volume);
        if data_changed {
            lvm::remove_lv(self.vgname, &tick)?;
            lvm::rename_lv(self.vgname, &tock, &tick)?;
        } else {
            lvm::remove_lv(self.vgname, &tock)?;
        }
        Ok(())
    }

    /// Finalize a monitor pass: rotate when the map gained changes,
    /// then commit the `-tmp` map as current.
    pub fn finalize_monitor(&self, vol: &Volume, map_updated: bool) -> Result<()> {
        self.rotate(&vol.name, map_updated)?;
        let map = DeltaMap::new(vol.mapfile());
        if map.tmp_exists() {
            map.commit()?;
        }
        Ok(())
    }

    /// Finalize a send: rotate when data was shipped, then reset the
    /// delta map to all-zero at the current volume size. The map is
    /// zeroed even on the no-change path, where no bit was set.
    pub fn finalize_send(&self, vol: &Volume, sent: bool, chunksize: u64) -> Result<()> {
        self.rotate(&vol.name, sent)?;
        let map = DeltaMap::new(vol.mapfile());
        map.initialize(vol.map_size(chunksize, None))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_names() {
        assert_eq!(tick_name("root"), "root.tick");
        assert_eq!(tock_name("vm-data.1"), "vm-data.1.tock");
    }
}
