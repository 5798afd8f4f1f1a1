//! CLI arguments and run-time settings
//!
//! One non-interactive engine instance runs at a time; every action is
//! a subcommand. Archive-wide settings (chunk size, compression,
//! source pool, destination) are fixed at `arch-init` and persisted in
//! `archive.ini`.

use crate::chunk::{validate_chunk_size, DEFAULT_CHUNK_SIZE};
use crate::compress;
use crate::error::{Result, VaultError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ThinVault - incremental snapshot backups for LVM thin volumes
#[derive(Parser, Debug, Clone)]
#[command(name = "thinvault")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental, content-addressed snapshot backups for thin-provisioned volumes")]
#[command(long_about = r#"
ThinVault captures point-in-time states of LVM thin volumes, derives
the minimal changed chunk set from the thin pool's own metadata, and
ships compressed, hashed chunks to a local or remote archive.

Examples:
  thinvault arch-init --source vg00/pool0 --dest ssh://backup/srv/archive
  thinvault add root                  # configure a volume
  thinvault send                      # back up all configured volumes
  thinvault monitor                   # accumulate deltas without sending
  thinvault prune --session 20240101-120000 root
  thinvault receive --save-to /dev/vg00/root root
"#)]
pub struct CliArgs {
    /// Non-interactive, suppress prompts
    #[arg(short = 'u', long, global = true)]
    pub unattended: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Engine actions
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send a backup session for the selected volumes
    Send {
        /// Store the session as a single tar file
        #[arg(long)]
        tarfile: bool,
        /// Deduplicate chunks against the whole archive while sending
        #[arg(long)]
        dedup: bool,
        /// Volumes to send (default: all configured)
        volumes: Vec<String>,
    },

    /// Accumulate block-change metadata without backing up
    Monitor {
        /// Volumes to monitor (default: all configured)
        volumes: Vec<String>,
    },

    /// Add a volume to the archive configuration
    Add {
        /// Volume (LV) name
        volume: String,
    },

    /// Remove a volume and all its archived data
    Delete {
        /// Volume name
        volume: String,
    },

    /// List configured volumes or their sessions
    List {
        /// Volumes whose sessions to list
        volumes: Vec<String>,
    },

    /// Merge a range of older sessions into their successor
    Prune {
        /// Session date-time or range `T[,T]` (YYYYMMDD-HHMMSS)
        #[arg(long)]
        session: String,
        /// Widen the range to everything before the date
        #[arg(long = "all-before")]
        all_before: bool,
        /// Volumes to prune (default: all configured)
        volumes: Vec<String>,
    },

    /// Restore a volume from the archive
    Receive {
        /// Path to store the volume (file or LV device path)
        #[arg(long = "save-to")]
        save_to: PathBuf,
        /// Session date-time (default: latest)
        #[arg(long)]
        session: Option<String>,
        /// Volume name
        volume: String,
    },

    /// Verify archived chunks against their manifest hashes
    Verify {
        /// Session date-time (default: latest)
        #[arg(long)]
        session: Option<String>,
        /// Volume name
        volume: String,
    },

    /// Compare the archive against the live volume
    Diff {
        /// Mark differing chunks in the delta map for the next send
        #[arg(long)]
        remap: bool,
        /// Volume name
        volume: String,
    },

    /// Initialize a new archive
    ArchInit {
        /// LVM volgroup/pool containing the source volumes
        #[arg(long)]
        source: String,
        /// Destination, e.g. `ssh://host/path` or `internal:/path`
        #[arg(long)]
        dest: String,
        /// Optional subdirectory under the destination mountpoint
        #[arg(long)]
        subdir: Option<String>,
        /// Compression spec `zlib[:LEVEL]`
        #[arg(long)]
        compression: Option<String>,
        /// Chunk size as a multiple of 64 KiB
        #[arg(long = "chunk-factor")]
        chunk_factor: Option<u64>,
    },

    /// Remove all archive data and metadata, keeping the configuration
    ArchDelete,

    /// Hardlink duplicate chunks across the whole archive
    ArchDeduplicate,

    /// Show the program version
    Version,
}

/// Parse an `arch-init --source VG/POOL` spec
pub fn parse_source(source: &str) -> Result<(String, String)> {
    match source.split_once('/') {
        Some((vg, pool)) if !vg.is_empty() && !pool.is_empty() => {
            Ok((vg.to_string(), pool.to_string()))
        }
        _ => Err(VaultError::config(format!(
            "--source must be VOLGROUP/POOL, got '{}'",
            source
        ))),
    }
}

/// Parse a `--compression zlib[:LEVEL]` spec
pub fn parse_compression(spec: &str) -> Result<(String, u32)> {
    let (name, level) = match spec.split_once(':') {
        Some((name, level)) => {
            let level: u32 = level
                .parse()
                .map_err(|_| VaultError::config(format!("Bad compression level: {}", level)))?;
            (name, level)
        }
        None => (spec, compress::DEFAULT_LEVEL),
    };
    compress::validate_algorithm(name)?;
    Ok((name.to_string(), level))
}

/// Resolve `--chunk-factor N` into a chunk size in bytes
pub fn chunk_size_from_factor(factor: u64) -> Result<u64> {
    let chunksize = factor.saturating_mul(DEFAULT_CHUNK_SIZE);
    validate_chunk_size(chunksize)?;
    Ok(chunksize)
}

/// Parse a `--session T[,T]` argument into its one or two date-times
pub fn parse_session_arg(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_source() {
        assert_eq!(
            parse_source("vg00/pool0").unwrap(),
            ("vg00".to_string(), "pool0".to_string())
        );
        assert!(parse_source("vg00").is_err());
        assert!(parse_source("/pool0").is_err());
    }

    #[test]
    fn test_parse_compression() {
        assert_eq!(parse_compression("zlib").unwrap(), ("zlib".into(), 4));
        assert_eq!(parse_compression("zlib:9").unwrap(), ("zlib".into(), 9));
        assert!(parse_compression("zstd").is_err());
        assert!(parse_compression("zlib:x").is_err());
    }

    #[test]
    fn test_chunk_factor() {
        assert_eq!(chunk_size_from_factor(1).unwrap(), 64 * 1024);
        assert_eq!(chunk_size_from_factor(4).unwrap(), 256 * 1024);
        // 16 MiB cap
        assert!(chunk_size_from_factor(256).is_ok());
        assert!(chunk_size_from_factor(257).is_err());
        assert!(chunk_size_from_factor(0).is_err());
    }

    #[test]
    fn test_parse_session_arg() {
        assert_eq!(
            parse_session_arg("20240101-000000,20240201-000000"),
            vec!["20240101-000000", "20240201-000000"]
        );
        assert_eq!(parse_session_arg("20240101-000000"), vec!["20240101-000000"]);
    }

    #[test]
    fn test_subcommand_parsing() {
        let args =
            CliArgs::try_parse_from(["thinvault", "-u", "prune", "--session", "20240101-000000"])
                .unwrap();
        assert!(args.unattended);
        match args.command {
            Command::Prune {
                session,
                all_before,
                volumes,
            } => {
                assert_eq!(session, "20240101-000000");
                assert!(!all_before);
                assert!(volumes.is_empty());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
