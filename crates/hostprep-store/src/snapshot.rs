use crate::fs::HostFs;
use crate::StoreError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Infix separating a source file name from its backup timestamp:
/// `sshd_config` is backed up as `sshd_config.hostprep-20261019T101500`.
pub const BACKUP_MARKER: &str = ".hostprep-";

const MAX_SUFFIX: u32 = 1000;

/// Timestamp shared by every backup of one run, second granularity.
pub fn run_stamp() -> String {
    chrono::Local::now().format("%Y%m%dT%H%M%S").to_string()
}

/// An immutable copy of a configuration file taken before it was mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub source: PathBuf,
    pub path: PathBuf,
    /// blake3 of the backed-up content.
    pub digest: String,
}

/// Writes backups beside their sources. One instance per run; the run
/// timestamp is fixed at construction.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    stamp: String,
}

impl Snapshotter {
    pub fn new(stamp: impl Into<String>) -> Self {
        Self {
            stamp: stamp.into(),
        }
    }

    pub fn for_now() -> Self {
        Self::new(run_stamp())
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// Copy `source` to a fresh, never-before-used backup path and verify the
    /// copy byte for byte. Returns only once the backup is durable.
    pub fn backup(&self, fs: &dyn HostFs, source: &Path) -> Result<Backup, StoreError> {
        let content = fs
            .read(source)?
            .ok_or_else(|| StoreError::SourceMissing(source.to_path_buf()))?;
        let expected = blake3::hash(content.as_bytes()).to_hex().to_string();

        let path = self.create_unique(fs, source, &content)?;

        let written = fs.read(&path)?.unwrap_or_default();
        let actual = blake3::hash(written.as_bytes()).to_hex().to_string();
        if actual != expected {
            return Err(StoreError::BackupMismatch {
                source_path: source.to_path_buf(),
                backup: path,
                expected,
                actual,
            });
        }

        info!("backed up {} to {}", source.display(), path.display());
        Ok(Backup {
            source: source.to_path_buf(),
            path,
            digest: expected,
        })
    }

    fn create_unique(
        &self,
        fs: &dyn HostFs,
        source: &Path,
        content: &str,
    ) -> Result<PathBuf, StoreError> {
        let base = format!("{}{BACKUP_MARKER}{}", file_name(source), self.stamp);
        for n in 0..MAX_SUFFIX {
            let name = if n == 0 {
                base.clone()
            } else {
                format!("{base}.{n}")
            };
            let candidate = source.with_file_name(name);
            match fs.create_new(&candidate, content) {
                Ok(()) => return Ok(candidate),
                Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::BackupNamesExhausted(source.to_path_buf()))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Whether `candidate` is a backup file of `source`.
pub fn is_backup_of(source: &Path, candidate: &Path) -> bool {
    if candidate.parent() != source.parent() {
        return false;
    }
    let prefix = format!("{}{BACKUP_MARKER}", file_name(source));
    file_name(candidate).starts_with(&prefix)
}

/// Backups of `source` currently on disk, oldest name first.
pub fn list_backups(fs: &dyn HostFs, source: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let Some(dir) = source.parent() else {
        return Ok(Vec::new());
    };
    Ok(fs
        .list_files(dir)?
        .into_iter()
        .filter(|p| is_backup_of(source, p))
        .collect())
}
