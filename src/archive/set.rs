//! Archive set: configuration plus configured volumes
//!
//! An ArchiveSet is a named archive rooted at a local metadata
//! directory and a remote destination. `archive.ini` persists the
//! chunking, compression and destination settings under `[var]` and
//! the volume enable flags under `[volumes]`.

use crate::archive::ini::IniDoc;
use crate::archive::volume::Volume;
use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::error::{IoResultExt, Result, VaultError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Longest accepted volume name
const MAX_VOLUME_NAME: usize = 112;

/// Reference to a session in the archive-wide chronological list.
/// Dedup session indices are positions in this list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub volume: String,
    pub session: String,
    pub localtime: String,
}

/// A named archive: config, volumes, and the global session ordering
#[derive(Debug)]
pub struct ArchiveSet {
    pub name: String,
    /// Local metadata root of this archive
    pub path: PathBuf,
    conf_path: PathBuf,
    conf: IniDoc,
    // persisted under [var]:
    pub chunksize: u64,
    pub compression: String,
    pub compr_level: u32,
    pub hashtype: String,
    pub vgname: Option<String>,
    pub poolname: Option<String>,
    pub destsys: Option<String>,
    pub destdir: String,
    pub destmountpoint: Option<String>,
    pub uuid: String,
    /// Enabled volumes, loaded from their metadata dirs
    pub vols: BTreeMap<String, Volume>,
    /// All sessions across all volumes, ordered by localtime
    pub allsessions: Vec<SessionRef>,
}

impl ArchiveSet {
    /// Load an archive's config and every enabled volume. A missing
    /// `archive.ini` yields an uninitialized set (used by `arch-init`).
    pub fn load(name: &str, top: &Path) -> Result<Self> {
        let path = top.join(name);
        let conf_path = path.join("archive.ini");
        let mut aset = Self {
            name: name.to_string(),
            path: path.clone(),
            conf_path: conf_path.clone(),
            conf: IniDoc::new(),
            chunksize: DEFAULT_CHUNK_SIZE,
            compression: "zlib".to_string(),
            compr_level: 4,
            hashtype: "sha256".to_string(),
            vgname: None,
            poolname: None,
            destsys: None,
            destdir: ".".to_string(),
            destmountpoint: None,
            uuid: uuid::Uuid::new_v4().to_string(),
            vols: BTreeMap::new(),
            allsessions: Vec::new(),
        };
        if !conf_path.exists() {
            return Ok(aset);
        }

        aset.conf = IniDoc::load(&conf_path)?;
        if let Some(v) = aset.conf.get("var", "chunksize") {
            aset.chunksize = v
                .parse()
                .map_err(|_| VaultError::config(format!("Bad chunksize: {}", v)))?;
        }
        if let Some(v) = aset.conf.get("var", "compression") {
            aset.compression = v.to_string();
        }
        if let Some(v) = aset.conf.get("var", "compr_level") {
            aset.compr_level = v
                .parse()
                .map_err(|_| VaultError::config(format!("Bad compr_level: {}", v)))?;
        }
        if let Some(v) = aset.conf.get("var", "hashtype") {
            aset.hashtype = v.to_string();
        }
        aset.vgname = aset.conf.get("var", "vgname").map(String::from);
        aset.poolname = aset.conf.get("var", "poolname").map(String::from);
        aset.destsys = aset.conf.get("var", "destsys").map(String::from);
        if let Some(v) = aset.conf.get("var", "destdir") {
            aset.destdir = v.to_string();
        }
        aset.destmountpoint = aset.conf.get("var", "destmountpoint").map(String::from);
        if let Some(v) = aset.conf.get("var", "uuid") {
            aset.uuid = v.to_string();
        } else {
            // first load of a pre-uuid config: persist the fresh one
            aset.save_conf()?;
        }

        for (vname, flag) in aset.conf.section("volumes").to_vec() {
            if flag == "disable" {
                continue;
            }
            let vdir = path.join(&vname);
            std::fs::create_dir_all(&vdir).with_path(&vdir)?;
            let mut vol = Volume::load(&vname, vdir)?;
            vol.enabled = true;
            for sname in &vol.sesnames {
                aset.allsessions.push(SessionRef {
                    volume: vname.clone(),
                    session: sname.clone(),
                    localtime: vol.sessions[sname].localtime.clone(),
                });
            }
            aset.vols.insert(vname, vol);
        }
        aset.allsessions.sort_by(|a, b| a.localtime.cmp(&b.localtime));
        Ok(aset)
    }

    /// Whether `arch-init` has run for this archive
    pub fn initialized(&self) -> bool {
        self.destmountpoint.is_some()
    }

    /// Persist the `[var]` settings and the volume table
    pub fn save_conf(&mut self) -> Result<()> {
        self.conf.set("var", "chunksize", self.chunksize.to_string());
        self.conf.set("var", "compression", self.compression.clone());
        self.conf.set("var", "compr_level", self.compr_level.to_string());
        self.conf.set("var", "hashtype", self.hashtype.clone());
        self.conf
            .set("var", "vgname", self.vgname.clone().unwrap_or_default());
        self.conf
            .set("var", "poolname", self.poolname.clone().unwrap_or_default());
        self.conf
            .set("var", "destsys", self.destsys.clone().unwrap_or_default());
        self.conf.set("var", "destdir", self.destdir.clone());
        self.conf.set(
            "var",
            "destmountpoint",
            self.destmountpoint.clone().unwrap_or_default(),
        );
        self.conf.set("var", "uuid", self.uuid.clone());
        if self.conf.section("volumes").is_empty() {
            // ensure the section header survives an empty table
            self.conf.set("volumes", "", String::new());
            self.conf.remove("volumes", "");
        }
        if let Some(parent) = self.conf_path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        self.conf.save(&self.conf_path)
    }

    /// Path of the archive config file
    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    /// Names of all enabled volumes
    pub fn volume_names(&self) -> Vec<String> {
        self.vols.keys().cloned().collect()
    }

    /// Register a volume in the config. Fails on duplicates and on
    /// names outside `A-Z a-z 0-9 . + _ -` or longer than 112 chars.
    pub fn add_volume(&mut self, name: &str) -> Result<()> {
        if self.conf.get("volumes", name).is_some() {
            return Err(VaultError::config(format!("{} is already configured", name)));
        }
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '_' | '-'));
        if !valid {
            return Err(VaultError::config(
                "Only characters A-Z 0-9 . + _ - are allowed in volume names".to_string(),
            ));
        }
        if name.len() > MAX_VOLUME_NAME {
            return Err(VaultError::config(format!(
                "Volume name must be {} characters or less",
                MAX_VOLUME_NAME
            )));
        }
        self.conf.set("volumes", name, "enable");
        self.save_conf()
    }

    /// Drop a volume from the config and delete its local metadata
    pub fn delete_volume(&mut self, name: &str) -> Result<()> {
        if self.conf.remove("volumes", name).is_some() {
            self.save_conf()?;
        }
        self.vols.remove(name);
        self.allsessions.retain(|s| s.volume != name);
        let vdir = self.path.join(name);
        if vdir.exists() {
            std::fs::remove_dir_all(&vdir).with_path(&vdir)?;
        }
        Ok(())
    }

    /// Append a freshly created session to the chronological list and
    /// return its stable index. New sessions always carry the newest
    /// localtime, so the list stays sorted.
    pub fn register_session(&mut self, sref: SessionRef) -> usize {
        self.allsessions.push(sref);
        self.allsessions.len() - 1
    }

    /// Undo `register_session` for an aborted send
    pub fn unregister_session(&mut self, volume: &str, session: &str) {
        if let Some(last) = self.allsessions.last() {
            if last.volume == volume && last.session == session {
                self.allsessions.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_set(top: &Path) -> ArchiveSet {
        let mut aset = ArchiveSet::load("default", top).unwrap();
        aset.vgname = Some("vg00".into());
        aset.poolname = Some("pool0".into());
        aset.destsys = Some("internal:".into());
        aset.destmountpoint = Some("/mnt/backup".into());
        aset.save_conf().unwrap();
        aset
    }

    #[test]
    fn test_uninitialized_set() {
        let dir = TempDir::new().unwrap();
        let aset = ArchiveSet::load("default", dir.path()).unwrap();
        assert!(!aset.initialized());
        assert_eq!(aset.chunksize, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_conf_roundtrip() {
        let dir = TempDir::new().unwrap();
        let first = init_set(dir.path());
        let again = ArchiveSet::load("default", dir.path()).unwrap();
        assert!(again.initialized());
        assert_eq!(again.vgname.as_deref(), Some("vg00"));
        assert_eq!(again.compression, "zlib");
        assert_eq!(again.compr_level, 4);
        assert_eq!(again.uuid, first.uuid);
    }

    #[test]
    fn test_add_volume_validation() {
        let dir = TempDir::new().unwrap();
        let mut aset = init_set(dir.path());
        aset.add_volume("vm-root.1+a_b").unwrap();
        assert!(aset.add_volume("vm-root.1+a_b").is_err());
        assert!(aset.add_volume("bad/name").is_err());
        assert!(aset.add_volume("").is_err());
        assert!(aset.add_volume(&"x".repeat(113)).is_err());

        let again = ArchiveSet::load("default", dir.path()).unwrap();
        assert!(again.vols.contains_key("vm-root.1+a_b"));
    }

    #[test]
    fn test_delete_volume() {
        let dir = TempDir::new().unwrap();
        let mut aset = init_set(dir.path());
        aset.add_volume("root").unwrap();
        let mut aset = ArchiveSet::load("default", dir.path()).unwrap();
        aset.delete_volume("root").unwrap();
        assert!(!aset.path.join("root").exists());
        let again = ArchiveSet::load("default", dir.path()).unwrap();
        assert!(!again.vols.contains_key("root"));
    }

    #[test]
    fn test_register_session_keeps_order() {
        let dir = TempDir::new().unwrap();
        let mut aset = init_set(dir.path());
        let idx = aset.register_session(SessionRef {
            volume: "root".into(),
            session: "S_20240101-000000".into(),
            localtime: "20240101-000000".into(),
        });
        assert_eq!(idx, 0);
        let idx = aset.register_session(SessionRef {
            volume: "home".into(),
            session: "S_20240101-000001".into(),
            localtime: "20240101-000001".into(),
        });
        assert_eq!(idx, 1);
    }
}
