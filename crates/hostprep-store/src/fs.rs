use crate::{fsync_dir, StoreError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// The host filesystem as seen by the engine.
///
/// Every read and write of configuration files goes through this trait so the
/// engine can run against a sandbox. Paths are absolute host paths.
pub trait HostFs: Send + Sync {
    /// Read a text file. A missing file is `Ok(None)`, not an error.
    fn read(&self, path: &Path) -> Result<Option<String>, StoreError>;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Regular files directly inside `dir`, sorted by path. A missing
    /// directory yields an empty list.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError>;

    /// Replace (or create) `path` by writing a sibling temporary file and
    /// renaming it over the target. Readers see either the old or the new
    /// content, never a mix.
    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), StoreError>;

    /// Create `path`, failing with [`StoreError::AlreadyExists`] if it is
    /// present. The file is durable when this returns.
    fn create_new(&self, path: &Path, contents: &str) -> Result<(), StoreError>;

    /// Remove a file or a whole directory tree. Missing paths are fine.
    fn remove_tree(&self, path: &Path) -> Result<(), StoreError>;
}

/// [`HostFs`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

impl HostFs for RealFs {
    fn read(&self, path: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::at(path, e)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::at(dir, e)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::at(dir, e))?.path();
            // Follows symlinks, the same way daemons resolve include globs.
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let dir = parent_dir(path);
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::at(dir, e))?;
        tmp.write_all(contents.as_bytes())?;
        if let Ok(meta) = fs::metadata(path) {
            tmp.as_file().set_permissions(meta.permissions())?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| StoreError::at(path, e.error))?;
        fsync_dir(dir)?;
        debug!("wrote {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }

    fn create_new(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| StoreError::at(path, e))?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fsync_dir(parent_dir(path))?;
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<(), StoreError> {
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => Err(e),
        };
        result.map_err(|e| StoreError::at(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RealFs.read(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn write_atomic_replaces_content_and_keeps_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshd_config");
        fs::write(&path, "PasswordAuthentication no\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        RealFs
            .write_atomic(&path, "PasswordAuthentication yes\n")
            .unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "PasswordAuthentication yes\n"
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
        // No temporary files left behind.
        assert_eq!(RealFs.list_files(dir.path()).unwrap(), vec![path]);
    }

    #[test]
    fn create_new_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup");
        RealFs.create_new(&path, "one").unwrap();
        let err = RealFs.create_new(&path, "two").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "one");
    }

    #[test]
    fn list_files_sorted_and_skips_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.conf"), "").unwrap();
        fs::write(dir.path().join("a.conf"), "").unwrap();
        fs::create_dir(dir.path().join("sub.conf")).unwrap();
        let files = RealFs.list_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.conf"), dir.path().join("b.conf")]
        );
    }

    #[test]
    fn list_files_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RealFs.list_files(&dir.path().join("gone")).unwrap().is_empty());
    }

    #[test]
    fn remove_tree_handles_dirs_files_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("repo");
        fs::create_dir_all(tree.join(".git/objects")).unwrap();
        fs::write(tree.join("README"), "x").unwrap();
        RealFs.remove_tree(&tree).unwrap();
        assert!(!tree.exists());

        let file = dir.path().join("file");
        fs::write(&file, "x").unwrap();
        RealFs.remove_tree(&file).unwrap();
        assert!(!file.exists());

        RealFs.remove_tree(&dir.path().join("missing")).unwrap();
    }
}
