//! Host filesystem access and configuration backups for hostprep.
//!
//! This crate provides the storage layer the engine mutates through: the
//! injected `HostFs` trait with a real implementation (`RealFs`, atomic
//! write-then-rename with directory fsync) and an in-memory one (`MemoryFs`)
//! that journals every mutation, plus the `Snapshotter` that writes
//! timestamped, verified backups beside configuration files.

pub mod fs;
pub mod memory;
pub mod snapshot;

pub use fs::{HostFs, RealFs};
pub use memory::{FsEvent, MemoryFs};
pub use snapshot::{is_backup_of, list_backups, run_stamp, Backup, Snapshotter, BACKUP_MARKER};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` or file creation in it
/// survives a crash.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("filesystem I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("I/O error on {path}: {source}")]
    PathIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("file is not valid UTF-8: {0}")]
    NotUtf8(PathBuf),
    #[error("cannot back up missing file: {0}")]
    SourceMissing(PathBuf),
    #[error("backup {backup} does not match {source_path}: expected {expected}, got {actual}")]
    BackupMismatch {
        source_path: PathBuf,
        backup: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("no free backup name for {0}")]
    BackupNamesExhausted(PathBuf),
}

impl StoreError {
    pub(crate) fn at(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_path_buf()),
            std::io::ErrorKind::InvalidData => StoreError::NotUtf8(path.to_path_buf()),
            _ => StoreError::PathIo {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}
