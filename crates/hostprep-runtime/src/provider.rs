use crate::RuntimeError;
use hostprep_schema::{AptSource, LiveCheck};
use std::path::Path;
use std::sync::Arc;

/// Installs software. Calls are opaque to the engine: no retries, the first
/// error aborts the step.
pub trait PackageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Register a third-party package repository and its signing key.
    fn ensure_apt_source(&self, source: &AptSource) -> Result<(), RuntimeError>;

    fn ensure_package(&self, package: &str) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceHealth {
    Healthy,
    Unhealthy(String),
}

pub trait ServiceManager: Send + Sync {
    /// Make `unit` pick up its configuration and report whether it is
    /// running afterwards.
    fn reload(&self, unit: &str) -> Result<ServiceHealth, RuntimeError>;
}

pub trait AccountManager: Send + Sync {
    fn in_group(&self, user: &str, group: &str) -> Result<bool, RuntimeError>;

    fn add_to_group(&self, user: &str, group: &str) -> Result<(), RuntimeError>;
}

pub trait RepoMaterializer: Send + Sync {
    /// Fetch a fresh working copy of `url` into `path`. The caller has
    /// already removed anything at `path`.
    fn fetch(&self, url: &str, path: &Path) -> Result<(), RuntimeError>;
}

pub trait BinaryLocator: Send + Sync {
    fn has_binary(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCheckOutcome {
    Confirmed,
    Skipped,
    Inconclusive(String),
}

/// End-to-end checks run after a service has been reconfigured. They are
/// best-effort: an inconclusive answer is reported, never fatal.
pub trait LiveChecker: Send + Sync {
    fn check(&self, kind: LiveCheck) -> LiveCheckOutcome;
}

/// The set of host collaborators a run works with.
#[derive(Clone)]
pub struct HostProviders {
    pub packages: Arc<dyn PackageProvider>,
    pub services: Arc<dyn ServiceManager>,
    pub accounts: Arc<dyn AccountManager>,
    pub repos: Arc<dyn RepoMaterializer>,
    pub binaries: Arc<dyn BinaryLocator>,
    pub live: Arc<dyn LiveChecker>,
}

impl HostProviders {
    /// Collaborators that act on the real host.
    pub fn system() -> Self {
        Self {
            packages: Arc::new(crate::apt::AptProvider::new()),
            services: Arc::new(crate::systemd::Systemctl::new()),
            accounts: Arc::new(crate::accounts::UnixAccounts),
            repos: Arc::new(crate::git::GitMaterializer),
            binaries: Arc::new(crate::prereq::SearchPath),
            live: Arc::new(crate::ssh::SshLiveChecker::default()),
        }
    }

    /// Every collaborator backed by the same recording mock.
    pub fn mock(host: &Arc<crate::mock::MockHost>) -> Self {
        Self {
            packages: host.clone(),
            services: host.clone(),
            accounts: host.clone(),
            repos: host.clone(),
            binaries: host.clone(),
            live: host.clone(),
        }
    }
}

impl std::fmt::Debug for HostProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProviders")
            .field("packages", &self.packages.name())
            .finish_non_exhaustive()
    }
}
