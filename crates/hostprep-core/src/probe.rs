use crate::locator::locate;
use hostprep_runtime::HostProviders;
use hostprep_schema::ServiceSpec;
use hostprep_store::HostFs;
use std::path::PathBuf;
use tracing::debug;

/// One thing a run can ensure exists on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Binary(String),
    Directive {
        service: ServiceSpec,
        name: String,
        value: String,
    },
    GroupMember {
        user: String,
        group: String,
    },
    WorkingCopy(PathBuf),
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Binary(name) => write!(f, "binary {name}"),
            Capability::Directive {
                service,
                name,
                value,
            } => write!(f, "{} {name} {value}", service.name),
            Capability::GroupMember { user, group } => write!(f, "{user} in group {group}"),
            Capability::WorkingCopy(path) => write!(f, "working copy at {}", path.display()),
        }
    }
}

/// Side-effect-free satisfaction checks. Anything that cannot be read counts
/// as not satisfied.
pub struct Probe<'a> {
    fs: &'a dyn HostFs,
    providers: &'a HostProviders,
}

impl<'a> Probe<'a> {
    pub fn new(fs: &'a dyn HostFs, providers: &'a HostProviders) -> Self {
        Self { fs, providers }
    }

    pub fn satisfied(&self, capability: &Capability) -> bool {
        let ok = match capability {
            Capability::Binary(name) => self.providers.binaries.has_binary(name),
            Capability::Directive {
                service,
                name,
                value,
            } => match locate(self.fs, service, name) {
                Ok(located) => located.satisfies(value),
                Err(e) => {
                    debug!("cannot read {} configuration: {e}", service.name);
                    false
                }
            },
            Capability::GroupMember { user, group } => {
                match self.providers.accounts.in_group(user, group) {
                    Ok(member) => member,
                    Err(e) => {
                        debug!("group lookup for {user} failed: {e}");
                        false
                    }
                }
            }
            Capability::WorkingCopy(path) => self.fs.is_dir(&path.join(".git")),
        };
        debug!("probe {capability}: {}", if ok { "satisfied" } else { "unsatisfied" });
        ok
    }
}
