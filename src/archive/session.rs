//! Backup sessions
//!
//! A session is an immutable point-in-time record of the chunks that
//! changed between two snapshots of a volume. Its directory holds an
//! `info` file and a `manifest`, plus the chunk tree on the
//! destination side.

use crate::archive::ini::{load_kv, save_kv};
use crate::error::{Result, VaultError};
use std::path::{Path, PathBuf};

/// Prefix of every session directory name
pub const SESSION_PREFIX: &str = "S_";

/// `previous` value of the first session of a volume
pub const NO_PREVIOUS: &str = "none";

/// Timestamp layout of session names and `--session` arguments
pub const TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Validate a `YYYYMMDD-HHMMSS` date-time argument
pub fn validate_session_time(time: &str) -> Result<()> {
    chrono::NaiveDateTime::parse_from_str(time, TIME_FORMAT)
        .map_err(|_| VaultError::BadSessionTime(time.to_string()))?;
    Ok(())
}

/// Session directory name for a localtime stamp
pub fn session_name(localtime: &str) -> String {
    format!("{}{}", SESSION_PREFIX, localtime)
}

/// Storage format of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFormat {
    /// Chunk files in the two-level split tree
    Folders,
    /// A single tar file (write-only; unreadable by receive and merge)
    Tar,
}

impl SessionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Folders => "folders",
            Self::Tar => "tar",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "folders" => Ok(Self::Folders),
            "tar" => Ok(Self::Tar),
            other => Err(VaultError::config(format!("Unknown session format: {}", other))),
        }
    }
}

/// An immutable point-in-time record of one volume
#[derive(Debug, Clone)]
pub struct Session {
    /// `S_YYYYMMDD-HHMMSS`
    pub name: String,
    /// Local metadata directory of this session (may carry a `-tmp`
    /// suffix while a send is in flight)
    pub path: PathBuf,
    /// Name of the owning volume
    pub volume: String,
    // persisted in `info`:
    pub localtime: String,
    pub volsize: u64,
    pub format: SessionFormat,
    pub sequence: u64,
    /// Name of the predecessor session, or `"none"`
    pub previous: String,
}

impl Session {
    /// Load a session from its `info` file
    pub fn load(volume: &str, name: &str, path: PathBuf) -> Result<Self> {
        let info = load_kv(&path.join("info"))?;
        let get = |key: &str| -> Result<&String> {
            info.get(key).ok_or_else(|| {
                VaultError::Precondition(format!(
                    "Session {}/{} info missing '{}'",
                    volume, name, key
                ))
            })
        };
        let volsize = get("volsize")?.parse::<u64>().map_err(|_| {
            VaultError::Precondition(format!("Bad volsize in {}/{}", volume, name))
        })?;
        let sequence = get("sequence")?.parse::<u64>().map_err(|_| {
            VaultError::Precondition(format!("Bad sequence in {}/{}", volume, name))
        })?;
        let localtime = match info.get("localtime") {
            Some(t) if t != "None" => t.clone(),
            // older metadata recorded no localtime; the name carries it
            _ => name[SESSION_PREFIX.len()..].to_string(),
        };
        Ok(Self {
            name: name.to_string(),
            volume: volume.to_string(),
            localtime,
            volsize,
            format: SessionFormat::parse(get("format")?)?,
            sequence,
            previous: get("previous")?.clone(),
            path,
        })
    }

    /// Write the `info` file into the session directory
    pub fn save_info(&self) -> Result<()> {
        save_kv(
            &self.path.join("info"),
            &[
                ("localtime", self.localtime.clone()),
                ("volsize", self.volsize.to_string()),
                ("format", self.format.as_str().to_string()),
                ("sequence", self.sequence.to_string()),
                ("previous", self.previous.clone()),
            ],
        )
    }

    /// Path of this session's manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join("manifest")
    }

    /// Whether the manifest exists (a session dir without one is
    /// treated as absent)
    pub fn present(&self) -> bool {
        self.manifest_path().exists()
    }

    /// Whether this session has no predecessor
    pub fn is_first(&self) -> bool {
        self.previous == NO_PREVIOUS
    }
}

/// List session directory names under a volume metadata dir, skipping
/// in-flight `-tmp` remnants
pub fn scan_session_names(volume_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(volume_dir)
        .map_err(|e| VaultError::io(volume_dir, e))?
    {
        let entry = entry.map_err(|e| VaultError::io(volume_dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(SESSION_PREFIX) && !name.ends_with("-tmp") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_session_time() {
        assert!(validate_session_time("20240131-235959").is_ok());
        assert!(validate_session_time("20241301-000000").is_err());
        assert!(validate_session_time("2024-01-31").is_err());
        assert!(validate_session_time("S_20240131-235959").is_err());
    }

    #[test]
    fn test_session_info_roundtrip() {
        let dir = TempDir::new().unwrap();
        let spath = dir.path().join("S_20240101-120000");
        std::fs::create_dir(&spath).unwrap();
        let ses = Session {
            name: "S_20240101-120000".into(),
            path: spath.clone(),
            volume: "root".into(),
            localtime: "20240101-120000".into(),
            volsize: 2 * 1024 * 1024,
            format: SessionFormat::Folders,
            sequence: 3,
            previous: "S_20231231-120000".into(),
        };
        ses.save_info().unwrap();
        let loaded = Session::load("root", "S_20240101-120000", spath).unwrap();
        assert_eq!(loaded.volsize, 2 * 1024 * 1024);
        assert_eq!(loaded.sequence, 3);
        assert_eq!(loaded.format, SessionFormat::Folders);
        assert_eq!(loaded.previous, "S_20231231-120000");
        assert!(!loaded.is_first());
    }

    #[test]
    fn test_scan_skips_tmp_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("S_20240101-000000")).unwrap();
        std::fs::create_dir(dir.path().join("S_20240102-000000-tmp")).unwrap();
        std::fs::write(dir.path().join("volinfo"), "").unwrap();
        let names = scan_session_names(dir.path()).unwrap();
        assert_eq!(names, vec!["S_20240101-000000".to_string()]);
    }
}
