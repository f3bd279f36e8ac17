use crate::directive::same_value;
use crate::locator::locate;
use crate::mutator::{Change, Mutator};
use crate::probe::{Capability, Probe};
use crate::CoreError;
use hostprep_runtime::{HostProviders, LiveCheckOutcome, ServiceHealth};
use hostprep_schema::{DirectiveSpec, RepositorySpec, ServiceSpec, ToolSpec};
use hostprep_store::HostFs;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Everything a step may touch during a run.
pub struct StepContext<'a> {
    pub fs: &'a dyn HostFs,
    pub providers: &'a HostProviders,
    pub mutator: &'a Mutator,
}

impl StepContext<'_> {
    pub fn probe(&self) -> Probe<'_> {
        Probe::new(self.fs, self.providers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Verification {
    Confirmed,
    /// The post-condition holds but a live check could not confirm it works.
    Unconfirmed(String),
}

/// What `apply` did to the host filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Changes {
    pub files: Vec<Change>,
    pub removed: Vec<PathBuf>,
}

/// One idempotent unit of provisioning.
///
/// The engine calls `probe`, and only when it reports unsatisfied, `apply`
/// followed by `verify`.
pub trait Step {
    fn name(&self) -> &str;

    fn capability(&self) -> Capability;

    fn probe(&self, ctx: &StepContext<'_>) -> Result<bool, CoreError> {
        Ok(ctx.probe().satisfied(&self.capability()))
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<Changes, CoreError>;

    fn verify(&self, ctx: &StepContext<'_>) -> Result<Verification, CoreError> {
        let capability = self.capability();
        if ctx.probe().satisfied(&capability) {
            Ok(Verification::Confirmed)
        } else {
            Err(CoreError::Verification(format!(
                "{capability} still unsatisfied after {}",
                self.name()
            )))
        }
    }
}

pub struct PackageStep {
    name: String,
    tool: ToolSpec,
}

impl PackageStep {
    pub fn new(tool: ToolSpec) -> Self {
        Self {
            name: format!("install {}", tool.name),
            tool,
        }
    }
}

impl Step for PackageStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Binary(self.tool.binary.clone())
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<Changes, CoreError> {
        let packages = &ctx.providers.packages;
        if let Some(apt) = &self.tool.apt_source {
            packages
                .ensure_apt_source(apt)
                .map_err(|source| CoreError::Acquisition {
                    what: format!("registering package source for {}", self.tool.name),
                    source,
                })?;
        }
        info!("installing {} via {}", self.tool.package, packages.name());
        packages
            .ensure_package(&self.tool.package)
            .map_err(|source| CoreError::Acquisition {
                what: format!("installing {}", self.tool.package),
                source,
            })?;
        Ok(Changes::default())
    }
}

pub struct GroupStep {
    name: String,
    user: String,
    group: String,
}

impl GroupStep {
    pub fn new(user: &str, group: &str) -> Self {
        Self {
            name: format!("add {user} to {group}"),
            user: user.to_owned(),
            group: group.to_owned(),
        }
    }
}

impl Step for GroupStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::GroupMember {
            user: self.user.clone(),
            group: self.group.clone(),
        }
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<Changes, CoreError> {
        ctx.providers
            .accounts
            .add_to_group(&self.user, &self.group)
            .map_err(|source| CoreError::Acquisition {
                what: format!("adding {} to group {}", self.user, self.group),
                source,
            })?;
        Ok(Changes::default())
    }
}

/// Sets one directive for a service, reloads it, then runs the service's
/// live check.
pub struct DirectiveStep {
    name: String,
    service: ServiceSpec,
    directive: DirectiveSpec,
}

impl DirectiveStep {
    pub fn new(service: ServiceSpec, directive: DirectiveSpec) -> Self {
        Self {
            name: format!("set {} {} for {}", directive.name, directive.value, service.name),
            service,
            directive,
        }
    }
}

impl Step for DirectiveStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Directive {
            service: self.service.clone(),
            name: self.directive.name.clone(),
            value: self.directive.value.clone(),
        }
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<Changes, CoreError> {
        let located = locate(ctx.fs, &self.service, &self.directive.name)?;
        let enforcement = ctx
            .mutator
            .enforce(ctx.fs, &located, &self.directive.value)?;
        if enforcement.is_noop() {
            return Ok(Changes::default());
        }

        let unit = &self.service.unit;
        match ctx.providers.services.reload(unit) {
            Ok(ServiceHealth::Healthy) => info!("reloaded {unit}"),
            Ok(ServiceHealth::Unhealthy(reason)) => {
                return Err(CoreError::ServiceUnhealthy {
                    unit: unit.clone(),
                    reason,
                })
            }
            Err(e) => {
                return Err(CoreError::ServiceUnhealthy {
                    unit: unit.clone(),
                    reason: e.to_string(),
                })
            }
        }
        Ok(Changes {
            files: enforcement.changes,
            removed: Vec::new(),
        })
    }

    fn verify(&self, ctx: &StepContext<'_>) -> Result<Verification, CoreError> {
        let located = locate(ctx.fs, &self.service, &self.directive.name)?;
        if !located.satisfies(&self.directive.value) {
            let found = located
                .declaring()
                .find(|s| s.conflicts_with(&self.directive.value))
                .map_or_else(
                    || "not declared anywhere".to_owned(),
                    |s| {
                        let value = s
                            .declarations
                            .iter()
                            .map(|d| d.value.as_str())
                            .find(|v| !same_value(v, &self.directive.value))
                            .unwrap_or_default();
                        format!("{} declares {value}", s.source.path.display())
                    },
                );
            return Err(CoreError::Verification(format!(
                "{} does not read {} after update ({found})",
                self.directive.name, self.directive.value
            )));
        }
        match ctx.providers.live.check(self.service.live_check) {
            LiveCheckOutcome::Confirmed | LiveCheckOutcome::Skipped => Ok(Verification::Confirmed),
            LiveCheckOutcome::Inconclusive(reason) => {
                warn!("{}: live check inconclusive: {reason}", self.name);
                Ok(Verification::Unconfirmed(reason))
            }
        }
    }
}

/// Replaces any existing working copy with a fresh clone.
pub struct RepositoryStep {
    name: String,
    repository: RepositorySpec,
}

impl RepositoryStep {
    pub fn new(repository: RepositorySpec) -> Self {
        Self {
            name: format!("clone {}", repository.url),
            repository,
        }
    }
}

impl Step for RepositoryStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::WorkingCopy(self.repository.path.clone())
    }

    /// Never satisfied: every run materializes a fresh copy.
    fn probe(&self, _ctx: &StepContext<'_>) -> Result<bool, CoreError> {
        Ok(false)
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<Changes, CoreError> {
        let path = &self.repository.path;
        let mut removed = Vec::new();
        if ctx.fs.exists(path) {
            info!("removing existing {}", path.display());
            ctx.fs
                .remove_tree(path)
                .map_err(|source| CoreError::ConfigMutation {
                    path: path.clone(),
                    source,
                })?;
            removed.push(path.clone());
        }
        ctx.providers
            .repos
            .fetch(&self.repository.url, path)
            .map_err(|source| CoreError::Acquisition {
                what: format!("cloning {}", self.repository.url),
                source,
            })?;
        Ok(Changes {
            files: Vec::new(),
            removed,
        })
    }
}
