//! Error types for ThinVault
//!
//! This module defines all error types used throughout the engine,
//! providing detailed error information for diagnostics and exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ThinVault operations
#[derive(Error, Debug)]
pub enum VaultError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error (bad archive.ini, malformed --dest, missing VG/pool)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Archive/volume state violates a precondition
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// External tool returned a non-zero status
    #[error("Command '{command}' failed: {message}")]
    ExternalTool { command: String, message: String },

    /// LVM query or operation failed
    #[error("LVM error: {0}")]
    Lvm(String),

    /// Chunk hash mismatch during receive
    #[error("Integrity check failed for chunk {address}: expected {expected}, got {actual}")]
    HashMismatch {
        address: String,
        expected: String,
        actual: String,
    },

    /// Chunk size or decompressed length out of bounds
    #[error("Bad chunk data at {address}: {message}")]
    BadChunk { address: String, message: String },

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Manifest parsing or consistency error
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Destination transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote stream did not close cleanly
    #[error("Destination stream timed out after {0} seconds")]
    StreamTimeout(u64),

    /// Another instance holds the lockfile
    #[error("Already running (lock held on '{0}')")]
    Locked(PathBuf),

    /// Delta map and snapshot state disagree
    #[error("Snapshot state error for '{volume}': {message}")]
    SnapshotState { volume: String, message: String },

    /// Invalid session name or date-time
    #[error("Invalid session date-time: {0}")]
    BadSessionTime(String),

    /// Clean "nothing to do" exit
    #[error("{0}")]
    NoWork(String),
}

impl VaultError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a precondition error
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Create an external tool error
    pub fn tool(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a bad-chunk error
    pub fn bad_chunk(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadChunk {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Whether this error is the clean "no work to do" case (exit 0)
    pub fn is_no_work(&self) -> bool {
        matches!(self, Self::NoWork(_))
    }
}

/// Result type alias for ThinVault operations
pub type Result<T> = std::result::Result<T, VaultError>;

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| VaultError::io(path, e))
    }
}
