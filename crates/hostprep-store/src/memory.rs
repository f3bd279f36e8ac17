use crate::fs::HostFs;
use crate::StoreError;
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A mutation observed by [`MemoryFs`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Write(PathBuf),
    Create(PathBuf),
    Remove(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Write(p) | FsEvent::Create(p) | FsEvent::Remove(p) => p,
        }
    }
}

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
    read_only: BTreeSet<PathBuf>,
    journal: Vec<FsEvent>,
}

impl MemState {
    fn add_ancestors(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn check_writable(&self, path: &Path) -> Result<(), StoreError> {
        let denied = self.read_only.contains(path)
            || path.parent().is_some_and(|p| self.read_only.contains(p));
        if denied {
            return Err(StoreError::at(
                path,
                std::io::Error::from(ErrorKind::PermissionDenied),
            ));
        }
        let parent_ok = path.parent().is_some_and(|p| self.dirs.contains(p));
        if !parent_ok {
            return Err(StoreError::at(
                path,
                std::io::Error::from(ErrorKind::NotFound),
            ));
        }
        Ok(())
    }
}

/// In-memory [`HostFs`] used to exercise the engine without touching the host.
///
/// Keeps a journal of every mutation so tests can assert on ordering
/// (for instance that a backup was created before its source was rewritten).
#[derive(Debug, Default)]
pub struct MemoryFs {
    state: Mutex<MemState>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        // A poisoned lock only means another test thread panicked.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a file (and its parent directories) without journaling it.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.insert_file(path, contents);
        self
    }

    /// Like [`with_file`](Self::with_file) for a shared instance; used by
    /// collaborators that produce files outside the engine (a clone).
    pub fn insert_file(&self, path: impl Into<PathBuf>, contents: &str) {
        let path = path.into();
        let mut st = self.lock();
        st.add_ancestors(&path);
        st.files.insert(path, contents.to_owned());
    }

    /// Seed an empty directory (and its parents).
    #[must_use]
    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        {
            let mut st = self.lock();
            st.add_ancestors(&path);
            st.dirs.insert(path);
        }
        self
    }

    /// Make writes to `path`, or to any file directly inside it, fail with
    /// permission denied.
    pub fn set_read_only(&self, path: impl Into<PathBuf>) {
        self.lock().read_only.insert(path.into());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn journal(&self) -> Vec<FsEvent> {
        self.lock().journal.clone()
    }

    /// Index of the first journal entry touching `path`, if any.
    pub fn first_event_for(&self, path: impl AsRef<Path>) -> Option<usize> {
        self.lock()
            .journal
            .iter()
            .position(|e| e.path() == path.as_ref())
    }
}

impl HostFs for MemoryFs {
    fn read(&self, path: &Path) -> Result<Option<String>, StoreError> {
        Ok(self.lock().files.get(path).cloned())
    }

    fn exists(&self, path: &Path) -> bool {
        let st = self.lock();
        st.files.contains_key(path) || st.dirs.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.lock().dirs.contains(path)
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self
            .lock()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let mut st = self.lock();
        if st.dirs.contains(path) {
            return Err(StoreError::at(
                path,
                std::io::Error::from(ErrorKind::InvalidInput),
            ));
        }
        st.check_writable(path)?;
        st.files.insert(path.to_path_buf(), contents.to_owned());
        st.journal.push(FsEvent::Write(path.to_path_buf()));
        Ok(())
    }

    fn create_new(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let mut st = self.lock();
        if st.files.contains_key(path) || st.dirs.contains(path) {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }
        st.check_writable(path)?;
        st.files.insert(path.to_path_buf(), contents.to_owned());
        st.journal.push(FsEvent::Create(path.to_path_buf()));
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<(), StoreError> {
        let mut st = self.lock();
        let before = st.files.len() + st.dirs.len();
        st.files.retain(|p, _| !p.starts_with(path));
        st.dirs.retain(|p| !p.starts_with(path));
        if st.files.len() + st.dirs.len() != before {
            st.journal.push(FsEvent::Remove(path.to_path_buf()));
        }
        Ok(())
    }
}
