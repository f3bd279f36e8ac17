use crate::command;
use crate::provider::RepoMaterializer;
use crate::RuntimeError;
use std::path::Path;
use tracing::info;

/// [`RepoMaterializer`] that shells out to `git clone`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitMaterializer;

impl RepoMaterializer for GitMaterializer {
    fn fetch(&self, url: &str, path: &Path) -> Result<(), RuntimeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let target = path.to_string_lossy();
        info!("cloning {url} into {target}");
        command::run(
            "git",
            &["clone", "--quiet", "--", url, &target],
            &[("GIT_TERMINAL_PROMPT", "0")],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_of_missing_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-repo");
        let err = GitMaterializer
            .fetch(&missing.to_string_lossy(), &dir.path().join("checkout"))
            .unwrap_err();
        // Either git is absent or the clone fails; both are errors.
        assert!(matches!(
            err,
            RuntimeError::Spawn { .. } | RuntimeError::CommandFailed { .. }
        ));
    }
}
