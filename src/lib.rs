//! # ThinVault - Incremental Snapshot Backups for Thin Volumes
//!
//! ThinVault is an incremental, content-addressed snapshot-backup
//! engine for LVM thin-provisioned block volumes. It captures
//! successive point-in-time states of one or more logical volumes,
//! derives the minimal set of changed chunk ranges from the thin
//! pool's own metadata, and ships compressed, hashed chunks to a
//! local or remote archive addressable by chunk position.
//!
//! ## How it works
//!
//! - **Tick/tock snapshots**: each volume keeps a baseline snapshot
//!   (`.tick`) and gains a fresh one (`.tock`) at the start of every
//!   monitor or send; `thin_delta` diffs the two in pool metadata.
//! - **Delta map**: a per-volume bitmap with one bit per chunk,
//!   OR-accumulated between sends and zeroed only after a send
//!   commits.
//! - **Sessions**: each send emits an immutable session - a manifest
//!   of `(hash, address)` pairs plus a tar stream of zlib-compressed
//!   chunk files - that together with its predecessors reconstructs
//!   the exact volume state at snapshot time.
//! - **Dedup**: an in-memory hash index maps chunk hashes to their
//!   first occurrence so identical chunks become hardlinks.
//! - **Prune**: older sessions merge into their successor with a
//!   newest-wins fold of their manifests, without rewriting chunks
//!   that do not change.
//!
//! ## Quick start
//!
//! ```no_run
//! use thinvault::config::CliArgs;
//! use clap::Parser;
//!
//! let args = CliArgs::parse_from(["thinvault", "send"]);
//! if let Err(e) = thinvault::ops::run(&args.command, args.unattended) {
//!     eprintln!("Error: {}", e);
//! }
//! ```

#![warn(clippy::all)]

pub mod archive;
pub mod chunk;
pub mod compress;
pub mod config;
pub mod dedup;
pub mod delta;
pub mod error;
pub mod lock;
pub mod lvm;
pub mod ops;
pub mod progress;
pub mod prune;
pub mod receive;
pub mod send;
pub mod snapshot;
pub mod transport;

// Re-export commonly used types
pub use archive::{ArchiveSet, Manifest, Session, Volume};
pub use delta::DeltaMap;
pub use error::{Result, VaultError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
