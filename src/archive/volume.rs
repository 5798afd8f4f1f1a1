//! Configured source volumes
//!
//! A volume owns its sessions and the singly linked session chain
//! formed by each session's `previous` pointer. Its `volinfo` file
//! records the chain endpoints; the byte size of the last session is
//! the authoritative volume size.

use crate::archive::ini::{load_kv, save_kv};
use crate::archive::session::{
    scan_session_names, Session, SessionFormat, NO_PREVIOUS,
};
use crate::chunk::map_bytes;
use crate::error::{Result, VaultError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Archive metadata format version this build reads and writes
pub const FORMAT_VERSION: u32 = 1;

/// A configured source volume and its session chain
#[derive(Debug)]
pub struct Volume {
    pub name: String,
    /// Local metadata directory (`<archive-root>/<volume>`)
    pub path: PathBuf,
    // persisted in `volinfo`:
    pub format_ver: u32,
    pub uuid: String,
    pub first: Option<String>,
    pub last: Option<String>,
    pub que_meta_update: bool,
    // runtime:
    /// Whether the source LV currently exists
    pub present: bool,
    pub enabled: bool,
    /// Authoritative size, taken from the last session (0 if none)
    pub volsize: u64,
    pub sessions: BTreeMap<String, Session>,
    /// Session names ordered oldest to newest along the `previous` chain
    pub sesnames: Vec<String>,
}

impl Volume {
    /// Load a volume's metadata directory: `volinfo` plus every
    /// committed session
    pub fn load(name: &str, path: PathBuf) -> Result<Self> {
        let mut vol = Self {
            name: name.to_string(),
            path: path.clone(),
            format_ver: FORMAT_VERSION,
            uuid: uuid::Uuid::new_v4().to_string(),
            first: None,
            last: None,
            que_meta_update: false,
            present: false,
            enabled: false,
            volsize: 0,
            sessions: BTreeMap::new(),
            sesnames: Vec::new(),
        };

        let volinfo = path.join("volinfo");
        if volinfo.exists() {
            let info = load_kv(&volinfo)?;
            if let Some(v) = info.get("format_ver") {
                vol.format_ver = v.parse().map_err(|_| {
                    VaultError::Precondition(format!("Bad format_ver for {}", name))
                })?;
            }
            if let Some(v) = info.get("uuid") {
                vol.uuid = v.clone();
            }
            vol.first = info.get("first").cloned().filter(|v| v != "none");
            vol.last = info.get("last").cloned().filter(|v| v != "none");
            vol.que_meta_update = info.get("que_meta_update").map(|v| v == "true").unwrap_or(false);
        }

        if vol.format_ver > FORMAT_VERSION {
            return Err(VaultError::Precondition(format!(
                "Archive format ver = {} for {}. Expected <= {}",
                vol.format_ver, name, FORMAT_VERSION
            )));
        }

        for sname in scan_session_names(&path)? {
            let ses = Session::load(name, &sname, path.join(&sname))?;
            if !ses.present() {
                return Err(VaultError::Precondition(format!(
                    "Manifest does not exist for {}/{}",
                    name, sname
                )));
            }
            vol.sessions.insert(sname, ses);
        }

        vol.rebuild_chain();
        vol.volsize = vol
            .last
            .as_ref()
            .and_then(|l| vol.sessions.get(l))
            .map(|s| s.volsize)
            .unwrap_or(0);
        Ok(vol)
    }

    /// Rebuild `sesnames` by walking `previous` pointers back from
    /// `last`, and warn about chain inconsistencies
    fn rebuild_chain(&mut self) {
        let mut names = Vec::new();
        let mut cursor = self.last.clone();
        for _ in 0..self.sessions.len() {
            let sname = match cursor {
                Some(ref s) => s.clone(),
                None => break,
            };
            names.insert(0, sname.clone());
            match self.sessions.get(&sname) {
                Some(ses) if ses.is_first() => break,
                Some(ses) => cursor = Some(ses.previous.clone()),
                None => break,
            }
        }
        for (sname, ses) in &self.sessions {
            if ses.is_first() && self.first.as_deref() != Some(sname) {
                warn!(volume = %self.name, session = %sname, "first-session mismatch");
            } else if !ses.is_first() && !self.sessions.contains_key(&ses.previous) {
                warn!(volume = %self.name, session = %sname, previous = %ses.previous,
                      "previous session not found");
            }
        }
        self.sesnames = names;
    }

    /// Path of the persistent delta map file
    pub fn mapfile(&self) -> PathBuf {
        self.path.join("deltamap")
    }

    /// Delta map length in bytes for this volume (or an explicit size)
    pub fn map_size(&self, chunksize: u64, volume_size: Option<u64>) -> u64 {
        map_bytes(volume_size.unwrap_or(self.volsize), chunksize)
    }

    /// Whether a delta map exists for this volume
    pub fn map_exists(&self) -> bool {
        self.mapfile().exists()
    }

    /// Write `volinfo` (or a `-tmp` sibling) to disk
    pub fn save_volinfo(&self, fname: &str) -> Result<()> {
        save_kv(
            &self.path.join(fname),
            &[
                ("format_ver", FORMAT_VERSION.to_string()),
                ("uuid", self.uuid.clone()),
                ("first", self.first.clone().unwrap_or_else(|| "none".into())),
                ("last", self.last.clone().unwrap_or_else(|| "none".into())),
                (
                    "que_meta_update",
                    if self.que_meta_update { "true" } else { "false" }.to_string(),
                ),
            ],
        )
    }

    /// Allocate a new in-flight session appended to the chain. Its
    /// directory carries a `-tmp` suffix until the send commits.
    pub fn new_session(
        &mut self,
        name: &str,
        localtime: &str,
        volsize: u64,
        format: SessionFormat,
    ) -> &Session {
        let (previous, sequence) = match self.last.as_ref().and_then(|l| self.sessions.get(l)) {
            Some(last) => (last.name.clone(), last.sequence + 1),
            None => (NO_PREVIOUS.to_string(), 0),
        };
        if self.first.is_none() {
            self.first = Some(name.to_string());
        }
        let ses = Session {
            name: name.to_string(),
            path: self.path.join(format!("{}-tmp", name)),
            volume: self.name.clone(),
            localtime: localtime.to_string(),
            volsize,
            format,
            sequence,
            previous,
        };
        self.last = Some(name.to_string());
        self.sesnames.push(name.to_string());
        self.sessions.insert(name.to_string(), ses);
        &self.sessions[name]
    }

    /// Undo `new_session` for a send that shipped nothing. Only the
    /// newest (in-flight) session can be aborted.
    pub fn abort_session(&mut self, name: &str) {
        if self.last.as_deref() != Some(name) {
            return;
        }
        self.sessions.remove(name);
        self.sesnames.pop();
        self.last = self.sesnames.last().cloned();
        if self.first.as_deref() == Some(name) {
            self.first = None;
        }
    }

    /// Remove a pruned session record, relinking its successor's
    /// `previous` pointer. Returns the successor's name. The last
    /// session can never be deleted.
    pub fn delete_session(&mut self, name: &str) -> Result<String> {
        if self.last.as_deref() == Some(name) {
            return Err(VaultError::precondition(format!(
                "Cannot delete last session {} of {}",
                name, self.name
            )));
        }
        let index = self
            .sesnames
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| {
                VaultError::precondition(format!("No session {} in {}", name, self.name))
            })?;
        let previous = self
            .sessions
            .get(name)
            .map(|s| s.previous.clone())
            .ok_or_else(|| {
                VaultError::precondition(format!("No session {} in {}", name, self.name))
            })?;
        let affected = self.sesnames[index + 1].clone();
        if let Some(next) = self.sessions.get_mut(&affected) {
            next.previous = previous;
        }
        if index == 0 {
            self.first = Some(affected.clone());
        }
        self.sesnames.remove(index);
        self.sessions.remove(name);

        let dir = self.path.join(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| VaultError::io(&dir, e))?;
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit_session(vol: &mut Volume, name: &str, volsize: u64) {
        let localtime = name.trim_start_matches("S_").to_string();
        vol.new_session(name, &localtime, volsize, SessionFormat::Folders);
        // simulate commit: drop the -tmp suffix and persist
        let committed = vol.path.join(name);
        std::fs::create_dir_all(&committed).unwrap();
        let ses = vol.sessions.get_mut(name).unwrap();
        ses.path = committed;
        ses.save_info().unwrap();
        std::fs::write(ses.manifest_path(), "").unwrap();
        vol.volsize = volsize;
    }

    fn test_volume(dir: &TempDir) -> Volume {
        let path = dir.path().join("root");
        std::fs::create_dir(&path).unwrap();
        Volume::load("root", path).unwrap()
    }

    #[test]
    fn test_empty_volume() {
        let dir = TempDir::new().unwrap();
        let vol = test_volume(&dir);
        assert!(vol.first.is_none());
        assert_eq!(vol.volsize, 0);
        assert!(vol.sesnames.is_empty());
    }

    #[test]
    fn test_session_chain_load() {
        let dir = TempDir::new().unwrap();
        let mut vol = test_volume(&dir);
        commit_session(&mut vol, "S_20240101-000000", 1024 * 1024);
        commit_session(&mut vol, "S_20240102-000000", 2 * 1024 * 1024);
        vol.save_volinfo("volinfo").unwrap();

        let reloaded = Volume::load("root", vol.path.clone()).unwrap();
        assert_eq!(reloaded.first.as_deref(), Some("S_20240101-000000"));
        assert_eq!(reloaded.last.as_deref(), Some("S_20240102-000000"));
        assert_eq!(
            reloaded.sesnames,
            vec!["S_20240101-000000", "S_20240102-000000"]
        );
        // size comes from the last session
        assert_eq!(reloaded.volsize, 2 * 1024 * 1024);
        assert_eq!(reloaded.sessions["S_20240102-000000"].sequence, 1);
        assert!(reloaded.sessions["S_20240101-000000"].is_first());
    }

    #[test]
    fn test_delete_session_relinks() {
        let dir = TempDir::new().unwrap();
        let mut vol = test_volume(&dir);
        commit_session(&mut vol, "S_20240101-000000", 1024);
        commit_session(&mut vol, "S_20240102-000000", 1024);
        commit_session(&mut vol, "S_20240103-000000", 1024);

        let affected = vol.delete_session("S_20240102-000000").unwrap();
        assert_eq!(affected, "S_20240103-000000");
        assert_eq!(
            vol.sessions["S_20240103-000000"].previous,
            "S_20240101-000000"
        );
        assert_eq!(vol.first.as_deref(), Some("S_20240101-000000"));

        // deleting the oldest promotes the next as first
        let affected = vol.delete_session("S_20240101-000000").unwrap();
        assert_eq!(affected, "S_20240103-000000");
        assert_eq!(vol.first.as_deref(), Some("S_20240103-000000"));
        assert_eq!(vol.sessions["S_20240103-000000"].previous, NO_PREVIOUS);
    }

    #[test]
    fn test_delete_last_session_rejected() {
        let dir = TempDir::new().unwrap();
        let mut vol = test_volume(&dir);
        commit_session(&mut vol, "S_20240101-000000", 1024);
        assert!(vol.delete_session("S_20240101-000000").is_err());
    }
}
