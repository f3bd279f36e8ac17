use crate::provider::{
    AccountManager, BinaryLocator, LiveCheckOutcome, LiveChecker, PackageProvider,
    RepoMaterializer, ServiceHealth, ServiceManager,
};
use crate::RuntimeError;
use hostprep_schema::{AptSource, LiveCheck};
use hostprep_store::MemoryFs;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockState {
    binaries: BTreeSet<String>,
    package_binaries: BTreeMap<String, String>,
    groups: BTreeSet<(String, String)>,
    failing: BTreeSet<String>,
    unhealthy: BTreeSet<String>,
    live: Option<LiveCheckOutcome>,
    calls: Vec<String>,
}

/// Recording stand-in for every host collaborator.
///
/// Installing a package makes its binary visible; cloning writes a `.git`
/// marker into the attached [`MemoryFs`]. Every call is logged in order.
#[derive(Default)]
pub struct MockHost {
    state: Mutex<MockState>,
    fs: Option<Arc<MemoryFs>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a filesystem that clones materialize into.
    pub fn with_fs(fs: Arc<MemoryFs>) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            fs: Some(fs),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Mark a binary as already on the search path.
    pub fn install_binary(&self, name: &str) {
        self.lock().binaries.insert(name.to_owned());
    }

    /// Installing `package` provides `binary` (defaults to the package name).
    pub fn package_provides(&self, package: &str, binary: &str) {
        self.lock()
            .package_binaries
            .insert(package.to_owned(), binary.to_owned());
    }

    pub fn add_member(&self, user: &str, group: &str) {
        self.lock()
            .groups
            .insert((user.to_owned(), group.to_owned()));
    }

    /// Make every call whose log entry starts with `prefix` fail, e.g.
    /// `"install docker-ce"` or `"clone "`.
    pub fn fail_on(&self, prefix: &str) {
        self.lock().failing.insert(prefix.to_owned());
    }

    pub fn set_unhealthy(&self, unit: &str) {
        self.lock().unhealthy.insert(unit.to_owned());
    }

    pub fn set_live_outcome(&self, outcome: LiveCheckOutcome) {
        self.lock().live = Some(outcome);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn record(&self, call: String) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        let fails = st.failing.iter().any(|p| call.starts_with(p.as_str()));
        st.calls.push(call.clone());
        if fails {
            return Err(RuntimeError::CommandFailed {
                command: call,
                status: "exit status: 1".to_owned(),
                stderr: "mock failure".to_owned(),
            });
        }
        Ok(())
    }
}

impl PackageProvider for MockHost {
    fn name(&self) -> &str {
        "mock"
    }

    fn ensure_apt_source(&self, source: &AptSource) -> Result<(), RuntimeError> {
        self.record(format!("apt-source {}", source.list_name))
    }

    fn ensure_package(&self, package: &str) -> Result<(), RuntimeError> {
        self.record(format!("install {package}"))?;
        let mut st = self.lock();
        let binary = st
            .package_binaries
            .get(package)
            .cloned()
            .unwrap_or_else(|| package.to_owned());
        st.binaries.insert(binary);
        Ok(())
    }
}

impl ServiceManager for MockHost {
    fn reload(&self, unit: &str) -> Result<ServiceHealth, RuntimeError> {
        self.record(format!("reload {unit}"))?;
        if self.lock().unhealthy.contains(unit) {
            return Ok(ServiceHealth::Unhealthy(format!("{unit} failed to start")));
        }
        Ok(ServiceHealth::Healthy)
    }
}

impl AccountManager for MockHost {
    fn in_group(&self, user: &str, group: &str) -> Result<bool, RuntimeError> {
        Ok(self
            .lock()
            .groups
            .contains(&(user.to_owned(), group.to_owned())))
    }

    fn add_to_group(&self, user: &str, group: &str) -> Result<(), RuntimeError> {
        self.record(format!("usermod {user} {group}"))?;
        self.add_member(user, group);
        Ok(())
    }
}

impl RepoMaterializer for MockHost {
    fn fetch(&self, url: &str, path: &Path) -> Result<(), RuntimeError> {
        self.record(format!("clone {url} {}", path.display()))?;
        if let Some(fs) = &self.fs {
            fs.insert_file(path.join(".git").join("HEAD"), "ref: refs/heads/main\n");
            fs.insert_file(path.join("README.md"), &format!("cloned from {url}\n"));
        }
        Ok(())
    }
}

impl BinaryLocator for MockHost {
    fn has_binary(&self, name: &str) -> bool {
        self.lock().binaries.contains(name)
    }
}

impl LiveChecker for MockHost {
    fn check(&self, kind: LiveCheck) -> LiveCheckOutcome {
        if kind == LiveCheck::None {
            return LiveCheckOutcome::Skipped;
        }
        let mut st = self.lock();
        st.calls.push(format!("live-check {kind:?}"));
        st.live.clone().unwrap_or(LiveCheckOutcome::Confirmed)
    }
}
