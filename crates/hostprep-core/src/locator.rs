use crate::directive::{self, DeclLine};
use hostprep_schema::ServiceSpec;
use hostprep_store::{HostFs, StoreError, BACKUP_MARKER};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Primary,
    Secondary,
    Fallback,
}

/// A location that may declare directives for a service. Rank 0 has the
/// highest precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub rank: usize,
    pub kind: SourceKind,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub line: usize,
    pub value: String,
}

impl From<DeclLine> for Declaration {
    fn from(d: DeclLine) -> Self {
        Self {
            line: d.line,
            value: d.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedSource {
    pub source: ConfigSource,
    pub declarations: Vec<Declaration>,
}

impl LocatedSource {
    pub fn declares(&self) -> bool {
        !self.declarations.is_empty()
    }

    /// The value this source contributes: its first declaration.
    pub fn value(&self) -> Option<&str> {
        self.declarations.first().map(|d| d.value.as_str())
    }

    pub fn conflicts_with(&self, desired: &str) -> bool {
        self.declarations
            .iter()
            .any(|d| !directive::same_value(&d.value, desired))
    }
}

/// Where a directive nobody declares gets written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "path", rename_all = "kebab-case")]
pub enum FallbackTarget {
    /// A file in the service's include directory (created if missing).
    IncludeFile(PathBuf),
    /// The primary file itself.
    AppendPrimary(PathBuf),
}

impl FallbackTarget {
    pub fn path(&self) -> &Path {
        match self {
            FallbackTarget::IncludeFile(p) | FallbackTarget::AppendPrimary(p) => p,
        }
    }
}

/// The locator's view of one directive across a service's sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Located {
    pub service: String,
    pub directive: String,
    /// Every existing candidate source, highest precedence first.
    pub sources: Vec<LocatedSource>,
    pub fallback: FallbackTarget,
}

impl Located {
    pub fn declaring(&self) -> impl Iterator<Item = &LocatedSource> {
        self.sources.iter().filter(|s| s.declares())
    }

    pub fn is_absent(&self) -> bool {
        self.declaring().next().is_none()
    }

    /// The value in effect: the first declaration in the highest-precedence
    /// declaring source.
    pub fn effective_value(&self) -> Option<&str> {
        self.declaring().next().and_then(LocatedSource::value)
    }

    /// The single value every declaration agrees on, if they all agree.
    pub fn consistent_value(&self) -> Option<&str> {
        let first = self.effective_value()?;
        let agree = self
            .declaring()
            .flat_map(|s| s.declarations.iter())
            .all(|d| directive::same_value(&d.value, first));
        agree.then_some(first)
    }

    /// Declared somewhere, and nowhere with a value other than `desired`.
    pub fn satisfies(&self, desired: &str) -> bool {
        !self.is_absent() && self.declaring().all(|s| !s.conflicts_with(desired))
    }
}

/// Candidate sources for `service` in precedence order: the primary file,
/// then every file of the include directory matching the include pattern, in
/// lexical order. Missing candidates are reported with `exists == false`.
/// Backups taken by earlier runs are never candidates, whatever the pattern.
pub fn candidate_sources(
    fs: &dyn HostFs,
    service: &ServiceSpec,
) -> Result<Vec<ConfigSource>, StoreError> {
    let mut sources = vec![ConfigSource {
        path: service.primary.clone(),
        rank: 0,
        kind: SourceKind::Primary,
        exists: fs.exists(&service.primary),
    }];
    if let Some(dir) = service.include_dir.as_deref().filter(|d| fs.is_dir(d)) {
        let mut entries: Vec<PathBuf> = fs
            .list_files(dir)?
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| {
                        service.include_pattern.matches(n) && !n.contains(BACKUP_MARKER)
                    })
            })
            .collect();
        entries.sort();
        for path in entries {
            sources.push(ConfigSource {
                rank: sources.len(),
                path,
                kind: SourceKind::Secondary,
                exists: true,
            });
        }
    }
    Ok(sources)
}

pub fn fallback_target(fs: &dyn HostFs, service: &ServiceSpec) -> FallbackTarget {
    match service.include_dir.as_deref().filter(|d| fs.is_dir(d)) {
        Some(dir) => FallbackTarget::IncludeFile(dir.join(&service.fallback_file)),
        None => FallbackTarget::AppendPrimary(service.primary.clone()),
    }
}

/// Find every declaration of `directive` across the service's sources.
///
/// Absence is not an error: a missing primary file or include directory
/// simply contributes nothing.
pub fn locate(
    fs: &dyn HostFs,
    service: &ServiceSpec,
    directive: &str,
) -> Result<Located, StoreError> {
    let mut sources = Vec::new();
    for source in candidate_sources(fs, service)? {
        if !source.exists {
            debug!("{} does not exist", source.path.display());
            continue;
        }
        let Some(text) = fs.read(&source.path)? else {
            continue;
        };
        let declarations: Vec<Declaration> = directive::scan(&text, directive)
            .into_iter()
            .map(Declaration::from)
            .collect();
        debug!(
            "{}: {} declaration(s) of {directive}",
            source.path.display(),
            declarations.len()
        );
        sources.push(LocatedSource {
            source,
            declarations,
        });
    }
    Ok(Located {
        service: service.name.clone(),
        directive: directive.to_owned(),
        sources,
        fallback: fallback_target(fs, service),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sshd_spec;
    use hostprep_schema::FilePattern;
    use hostprep_store::MemoryFs;

    #[test]
    fn absent_everywhere() {
        let fs = MemoryFs::new().with_file("/etc/ssh/sshd_config", "Port 22\n");
        let located = locate(&fs, &sshd_spec(), "PasswordAuthentication").unwrap();
        assert!(located.is_absent());
        assert_eq!(located.sources.len(), 1);
        assert_eq!(
            located.fallback,
            FallbackTarget::AppendPrimary(PathBuf::from("/etc/ssh/sshd_config"))
        );
    }

    #[test]
    fn missing_primary_is_not_an_error() {
        let fs = MemoryFs::new();
        let located = locate(&fs, &sshd_spec(), "PasswordAuthentication").unwrap();
        assert!(located.sources.is_empty());
        assert!(located.is_absent());
    }

    #[test]
    fn secondary_files_follow_primary_in_lexical_order() {
        let fs = MemoryFs::new()
            .with_file("/etc/ssh/sshd_config", "PasswordAuthentication no\n")
            .with_file("/etc/ssh/sshd_config.d/50-cloud.conf", "PasswordAuthentication no\n")
            .with_file("/etc/ssh/sshd_config.d/10-base.conf", "Port 22\n")
            .with_file("/etc/ssh/sshd_config.d/README", "PasswordAuthentication no\n")
            .with_file(
                "/etc/ssh/sshd_config.d/50-cloud.conf.hostprep-20261019T101500",
                "PasswordAuthentication no\n",
            );
        let located = locate(&fs, &sshd_spec(), "PasswordAuthentication").unwrap();
        let paths: Vec<_> = located.sources.iter().map(|s| s.source.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/etc/ssh/sshd_config"),
                PathBuf::from("/etc/ssh/sshd_config.d/10-base.conf"),
                PathBuf::from("/etc/ssh/sshd_config.d/50-cloud.conf"),
            ]
        );
        assert_eq!(located.sources[2].source.rank, 2);
        assert_eq!(located.sources[2].source.kind, SourceKind::Secondary);
        assert_eq!(located.declaring().count(), 2);
        assert_eq!(located.effective_value(), Some("no"));
        assert_eq!(
            located.fallback,
            FallbackTarget::IncludeFile(PathBuf::from("/etc/ssh/sshd_config.d/99-hostprep.conf"))
        );
    }

    #[test]
    fn conflicting_values_have_no_consistent_value() {
        let fs = MemoryFs::new()
            .with_file("/etc/ssh/sshd_config", "PasswordAuthentication yes\n")
            .with_file("/etc/ssh/sshd_config.d/a.conf", "PasswordAuthentication no\n");
        let located = locate(&fs, &sshd_spec(), "PasswordAuthentication").unwrap();
        assert_eq!(located.effective_value(), Some("yes"));
        assert!(located.consistent_value().is_none());
        assert!(!located.satisfies("yes"));
        assert!(!located.satisfies("no"));
    }

    #[test]
    fn satisfied_when_all_agree() {
        let fs = MemoryFs::new()
            .with_file("/etc/ssh/sshd_config", "PasswordAuthentication yes\n")
            .with_file("/etc/ssh/sshd_config.d/a.conf", "passwordauthentication YES\n");
        let located = locate(&fs, &sshd_spec(), "PasswordAuthentication").unwrap();
        assert!(located.satisfies("yes"));
        assert_eq!(located.consistent_value(), Some("yes"));
    }

    #[test]
    fn match_all_pattern_skips_backups() {
        let mut spec = sshd_spec();
        spec.include_pattern = FilePattern::parse("*").unwrap();
        let fs = MemoryFs::new()
            .with_file("/etc/ssh/sshd_config", "Port 22\n")
            .with_file("/etc/ssh/sshd_config.d/50-cloud.conf", "PasswordAuthentication no\n")
            .with_file(
                "/etc/ssh/sshd_config.d/50-cloud.conf.hostprep-20261019T101500",
                "PasswordAuthentication no\n",
            )
            .with_file(
                "/etc/ssh/sshd_config.d/50-cloud.conf.hostprep-20261019T101500.1",
                "PasswordAuthentication no\n",
            );
        let sources = candidate_sources(&fs, &spec).unwrap();
        let paths: Vec<_> = sources.iter().map(|s| s.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/etc/ssh/sshd_config"),
                PathBuf::from("/etc/ssh/sshd_config.d/50-cloud.conf"),
            ]
        );
        let located = locate(&fs, &spec, "PasswordAuthentication").unwrap();
        assert_eq!(located.declaring().count(), 1);
    }
}
