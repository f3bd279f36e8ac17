use crate::directive;
use crate::locator::{FallbackTarget, Located, SourceKind};
use crate::CoreError;
use hostprep_store::{Backup, HostFs, Snapshotter, StoreError};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One file the mutator touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub created: bool,
    /// Backup taken before the change; `None` for newly created files and
    /// for files already backed up earlier in the run.
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Enforcement {
    pub changes: Vec<Change>,
}

impl Enforcement {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Applies directive changes with a backup before every first write.
///
/// One mutator lives for one run: a source rewritten by two steps is backed
/// up only once, so its single backup always holds the pre-run content.
#[derive(Debug)]
pub struct Mutator {
    snapshotter: Snapshotter,
    backups: RefCell<BTreeMap<PathBuf, Backup>>,
}

impl Mutator {
    pub fn new(snapshotter: Snapshotter) -> Self {
        Self {
            snapshotter,
            backups: RefCell::new(BTreeMap::new()),
        }
    }

    /// Backups taken so far in this run.
    pub fn backups(&self) -> Vec<Backup> {
        self.backups.borrow().values().cloned().collect()
    }

    fn snapshot_once(&self, fs: &dyn HostFs, path: &Path) -> Result<Option<PathBuf>, CoreError> {
        if self.backups.borrow().contains_key(path) {
            debug!("{} already backed up this run", path.display());
            return Ok(None);
        }
        let backup = self
            .snapshotter
            .backup(fs, path)
            .map_err(|source| mutation_error(path, source))?;
        let backup_path = backup.path.clone();
        self.backups.borrow_mut().insert(path.to_path_buf(), backup);
        Ok(Some(backup_path))
    }

    fn rewrite_file(
        &self,
        fs: &dyn HostFs,
        path: &Path,
        kind: SourceKind,
        edit: impl FnOnce(&str) -> Option<String>,
    ) -> Result<Option<Change>, CoreError> {
        let current = fs
            .read(path)
            .map_err(|source| mutation_error(path, source))?
            .ok_or_else(|| mutation_error(path, StoreError::SourceMissing(path.to_path_buf())))?;
        let Some(updated) = edit(&current) else {
            return Ok(None);
        };
        let backup = self.snapshot_once(fs, path)?;
        fs.write_atomic(path, &updated)
            .map_err(|source| mutation_error(path, source))?;
        info!("updated {}", path.display());
        Ok(Some(Change {
            path: path.to_path_buf(),
            kind,
            created: false,
            backup,
        }))
    }

    /// Make `located.directive` read `value` everywhere it is declared, or
    /// add it at the fallback location when nothing declares it.
    pub fn enforce(
        &self,
        fs: &dyn HostFs,
        located: &Located,
        value: &str,
    ) -> Result<Enforcement, CoreError> {
        let name = located.directive.as_str();
        let mut out = Enforcement::default();

        if !located.is_absent() {
            for src in located.declaring().filter(|s| s.conflicts_with(value)) {
                let change = self.rewrite_file(fs, &src.source.path, src.source.kind, |text| {
                    directive::rewrite(text, name, value)
                })?;
                out.changes.extend(change);
            }
            return Ok(out);
        }

        let (path, kind) = match &located.fallback {
            FallbackTarget::IncludeFile(p) => (p.as_path(), SourceKind::Fallback),
            FallbackTarget::AppendPrimary(p) => (p.as_path(), SourceKind::Primary),
        };
        if fs.exists(path) {
            let change = self.rewrite_file(fs, path, kind, |text| {
                Some(directive::append(text, name, value))
            })?;
            out.changes.extend(change);
        } else {
            let contents = match kind {
                SourceKind::Fallback => format!("# Managed by hostprep\n{name} {value}\n"),
                _ => format!("{name} {value}\n"),
            };
            fs.create_new(path, &contents)
                .map_err(|source| mutation_error(path, source))?;
            info!("created {}", path.display());
            out.changes.push(Change {
                path: path.to_path_buf(),
                kind,
                created: true,
                backup: None,
            });
        }
        Ok(out)
    }
}

fn mutation_error(path: &Path, source: StoreError) -> CoreError {
    CoreError::ConfigMutation {
        path: path.to_path_buf(),
        source,
    }
}
