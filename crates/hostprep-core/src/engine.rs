use crate::concurrency::shutdown_requested;
use crate::lifecycle::{StepState, StepTracker};
use crate::locator::{candidate_sources, fallback_target, locate, Located};
use crate::mutator::Mutator;
use crate::step::{
    Changes, DirectiveStep, GroupStep, PackageStep, RepositoryStep, Step, StepContext,
    Verification,
};
use crate::{CoreError, FailureKind};
use hostprep_runtime::{free_space_mb, is_root, HostProviders};
use hostprep_schema::NormalizedPlan;
use hostprep_store::{list_backups, HostFs, RealFs, Snapshotter};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A host condition checked before any step runs.
pub trait Precondition {
    fn name(&self) -> &str;

    fn check(&self) -> Result<(), String>;
}

/// At least `min_mb` megabytes free on the filesystem holding `path`.
#[derive(Debug, Clone)]
pub struct FreeSpace {
    pub path: PathBuf,
    pub min_mb: u64,
}

impl Precondition for FreeSpace {
    fn name(&self) -> &str {
        "free disk space"
    }

    fn check(&self) -> Result<(), String> {
        match free_space_mb(&self.path) {
            Some(avail) if avail < self.min_mb => Err(format!(
                "{} has {avail} MB free, {} MB required",
                self.path.display(),
                self.min_mb
            )),
            Some(avail) => {
                debug!("{}: {avail} MB free", self.path.display());
                Ok(())
            }
            None => {
                warn!("cannot determine free space on {}", self.path.display());
                Ok(())
            }
        }
    }
}

/// The run has the privileges package installs and config edits need.
#[derive(Debug, Clone, Copy)]
pub struct Privileges;

impl Precondition for Privileges {
    fn name(&self) -> &str {
        "root privileges"
    }

    fn check(&self) -> Result<(), String> {
        if is_root() {
            Ok(())
        } else {
            Err("hostprep must run as root (try sudo)".to_owned())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum StepResult {
    AlreadySatisfied,
    Applied {
        verification: Verification,
        changes: Changes,
    },
    Failed {
        kind: FailureKind,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// 1-based position in the run.
    pub position: usize,
    pub name: String,
    pub state: StepState,
    pub trail: Vec<StepState>,
    /// `None` for steps the run never reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

impl StepReport {
    fn pending(position: usize, name: &str) -> Self {
        let tracker = StepTracker::new();
        Self {
            position,
            name: name.to_owned(),
            state: tracker.state(),
            trail: tracker.trail().to_vec(),
            result: None,
        }
    }

    fn finished(position: usize, name: &str, tracker: &StepTracker, result: StepResult) -> Self {
        Self {
            position,
            name: name.to_owned(),
            state: tracker.state(),
            trail: tracker.trail().to_vec(),
            result: Some(result),
        }
    }

    pub fn is_unconfirmed(&self) -> bool {
        matches!(
            self.result,
            Some(StepResult::Applied {
                verification: Verification::Unconfirmed(_),
                ..
            })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "at", rename_all = "kebab-case")]
pub enum AbortStage {
    Preconditions,
    /// A step failed.
    Step { position: usize, name: String },
    /// Interrupted before this step started.
    BeforeStep { position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum RunOutcome {
    Converged {
        steps: Vec<StepReport>,
        backups: Vec<PathBuf>,
    },
    Aborted {
        stage: AbortStage,
        kind: FailureKind,
        reason: String,
        steps: Vec<StepReport>,
        backups: Vec<PathBuf>,
    },
}

impl RunOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, RunOutcome::Converged { .. })
    }

    pub fn steps(&self) -> &[StepReport] {
        match self {
            RunOutcome::Converged { steps, .. } | RunOutcome::Aborted { steps, .. } => steps,
        }
    }

    pub fn backups(&self) -> &[PathBuf] {
        match self {
            RunOutcome::Converged { backups, .. } | RunOutcome::Aborted { backups, .. } => backups,
        }
    }

    /// Applied steps whose live check was inconclusive.
    pub fn unconfirmed(&self) -> Vec<&StepReport> {
        self.steps().iter().filter(|s| s.is_unconfirmed()).collect()
    }

    pub fn applied_count(&self) -> usize {
        self.steps()
            .iter()
            .filter(|s| matches!(s.result, Some(StepResult::Applied { .. })))
            .count()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RunOutcome::Converged { .. } => None,
            RunOutcome::Aborted { kind, .. } => Some(*kind),
        }
    }
}

/// Probe-only view of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepPreview {
    pub position: usize,
    pub name: String,
    pub capability: String,
    pub satisfied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupListing {
    pub source: PathBuf,
    pub backups: Vec<PathBuf>,
}

/// The operator account for group steps: the plan's, else the invoking
/// sudo user.
pub fn resolve_account(plan: &NormalizedPlan) -> Option<String> {
    plan.account_user.clone().or_else(|| {
        std::env::var("SUDO_USER")
            .ok()
            .filter(|u| !u.is_empty() && u != "root")
    })
}

/// Steps for `plan` in run order: each tool's install (and its group
/// membership), then every directive, then the repository.
pub fn build_steps(
    plan: &NormalizedPlan,
    account: Option<&str>,
) -> Result<Vec<Box<dyn Step>>, CoreError> {
    let mut steps: Vec<Box<dyn Step>> = Vec::new();
    for tool in &plan.tools {
        steps.push(Box::new(PackageStep::new(tool.clone())));
        match (&tool.group, account) {
            (Some(group), Some(user)) => steps.push(Box::new(GroupStep::new(user, group))),
            (Some(group), None) => {
                warn!("no operator account known; skipping membership of group {group}");
            }
            (None, _) => {}
        }
    }
    for directive in &plan.directives {
        let service = plan
            .service(&directive.service)
            .ok_or_else(|| CoreError::UnknownService(directive.service.clone()))?;
        steps.push(Box::new(DirectiveStep::new(
            service.clone(),
            directive.clone(),
        )));
    }
    if let Some(repository) = &plan.repository {
        steps.push(Box::new(RepositoryStep::new(repository.clone())));
    }
    Ok(steps)
}

/// Drives steps strictly in order and stops at the first failure.
pub struct Engine {
    fs: Arc<dyn HostFs>,
    providers: HostProviders,
    snapshotter: Snapshotter,
    preconditions: Vec<Box<dyn Precondition>>,
    interrupted: Box<dyn Fn() -> bool>,
}

impl Engine {
    pub fn new(fs: Arc<dyn HostFs>, providers: HostProviders, snapshotter: Snapshotter) -> Self {
        Self {
            fs,
            providers,
            snapshotter,
            preconditions: Vec::new(),
            interrupted: Box::new(shutdown_requested),
        }
    }

    /// Engine acting on the real host, with the plan's preconditions.
    pub fn system(plan: &NormalizedPlan) -> Self {
        Self::new(
            Arc::new(RealFs::new()),
            HostProviders::system(),
            Snapshotter::for_now(),
        )
        .with_precondition(Privileges)
        .with_precondition(FreeSpace {
            path: plan.free_space_path.clone(),
            min_mb: plan.min_free_mb,
        })
    }

    #[must_use]
    pub fn with_precondition(mut self, precondition: impl Precondition + 'static) -> Self {
        self.preconditions.push(Box::new(precondition));
        self
    }

    /// Replace the between-steps interrupt check (Ctrl-C by default).
    #[must_use]
    pub fn with_interrupt_check(mut self, check: impl Fn() -> bool + 'static) -> Self {
        self.interrupted = Box::new(check);
        self
    }

    pub fn fs(&self) -> &dyn HostFs {
        self.fs.as_ref()
    }

    pub fn check_preconditions(&self) -> Result<(), CoreError> {
        for p in &self.preconditions {
            p.check().map_err(|reason| {
                CoreError::Precondition(format!("{}: {reason}", p.name()))
            })?;
            debug!("precondition ok: {}", p.name());
        }
        Ok(())
    }

    pub fn apply(
        &self,
        plan: &NormalizedPlan,
        account: Option<&str>,
    ) -> Result<RunOutcome, CoreError> {
        let steps = build_steps(plan, account)?;
        Ok(self.run(&steps))
    }

    pub fn run(&self, steps: &[Box<dyn Step>]) -> RunOutcome {
        if let Err(e) = self.check_preconditions() {
            error!("{e}");
            return RunOutcome::Aborted {
                stage: AbortStage::Preconditions,
                kind: e.kind(),
                reason: e.to_string(),
                steps: pending_from(steps, 0),
                backups: Vec::new(),
            };
        }

        let mutator = Mutator::new(self.snapshotter.clone());
        let ctx = StepContext {
            fs: self.fs.as_ref(),
            providers: &self.providers,
            mutator: &mutator,
        };
        let backups = || -> Vec<PathBuf> {
            mutator.backups().into_iter().map(|b| b.path).collect()
        };

        let total = steps.len();
        let mut reports = Vec::with_capacity(total);
        for (idx, step) in steps.iter().enumerate() {
            let position = idx + 1;
            if (self.interrupted)() {
                warn!("interrupted before step {position}/{total}");
                reports.extend(pending_from(steps, idx));
                return RunOutcome::Aborted {
                    stage: AbortStage::BeforeStep { position },
                    kind: FailureKind::Interrupted,
                    reason: "interrupted".to_owned(),
                    steps: reports,
                    backups: backups(),
                };
            }

            info!("step {position}/{total}: {}", step.name());
            let mut tracker = StepTracker::new();
            match drive(step.as_ref(), &ctx, &mut tracker) {
                Ok(result) => {
                    reports.push(StepReport::finished(position, step.name(), &tracker, result));
                }
                Err(e) => {
                    tracker.fail();
                    error!("step {position} ({}) failed: {e}", step.name());
                    let result = StepResult::Failed {
                        kind: e.kind(),
                        reason: e.to_string(),
                    };
                    reports.push(StepReport::finished(position, step.name(), &tracker, result));
                    reports.extend(pending_from(steps, position));
                    return RunOutcome::Aborted {
                        stage: AbortStage::Step {
                            position,
                            name: step.name().to_owned(),
                        },
                        kind: e.kind(),
                        reason: e.to_string(),
                        steps: reports,
                        backups: backups(),
                    };
                }
            }
        }

        RunOutcome::Converged {
            steps: reports,
            backups: backups(),
        }
    }

    /// Probe every step without applying anything.
    pub fn preview(&self, steps: &[Box<dyn Step>]) -> Vec<StepPreview> {
        let mutator = Mutator::new(self.snapshotter.clone());
        let ctx = StepContext {
            fs: self.fs.as_ref(),
            providers: &self.providers,
            mutator: &mutator,
        };
        steps
            .iter()
            .enumerate()
            .map(|(idx, step)| StepPreview {
                position: idx + 1,
                name: step.name().to_owned(),
                capability: step.capability().to_string(),
                satisfied: step.probe(&ctx).unwrap_or_else(|e| {
                    debug!("probe of {} failed: {e}", step.name());
                    false
                }),
            })
            .collect()
    }

    pub fn locate(
        &self,
        plan: &NormalizedPlan,
        service: &str,
        directive: &str,
    ) -> Result<Located, CoreError> {
        let spec = plan
            .service(service)
            .ok_or_else(|| CoreError::UnknownService(service.to_owned()))?;
        Ok(locate(self.fs.as_ref(), spec, directive)?)
    }

    /// Backups beside every candidate source of every configured service.
    pub fn backups(&self, plan: &NormalizedPlan) -> Result<Vec<BackupListing>, CoreError> {
        let mut listings = Vec::new();
        for service in &plan.services {
            let mut sources: Vec<PathBuf> = candidate_sources(self.fs.as_ref(), service)?
                .into_iter()
                .map(|s| s.path)
                .collect();
            let fallback = fallback_target(self.fs.as_ref(), service).path().to_path_buf();
            if !sources.contains(&fallback) {
                sources.push(fallback);
            }
            for source in sources {
                let backups = list_backups(self.fs.as_ref(), &source)?;
                if !backups.is_empty() {
                    listings.push(BackupListing { source, backups });
                }
            }
        }
        Ok(listings)
    }
}

fn pending_from(steps: &[Box<dyn Step>], from: usize) -> Vec<StepReport> {
    steps
        .iter()
        .enumerate()
        .skip(from)
        .map(|(idx, step)| StepReport::pending(idx + 1, step.name()))
        .collect()
}

fn drive(
    step: &dyn Step,
    ctx: &StepContext<'_>,
    tracker: &mut StepTracker,
) -> Result<StepResult, CoreError> {
    tracker.advance(StepState::Probing)?;
    if step.probe(ctx)? {
        tracker.advance(StepState::Satisfied)?;
        info!("{}: already satisfied", step.name());
        return Ok(StepResult::AlreadySatisfied);
    }
    tracker.advance(StepState::Applying)?;
    let changes = step.apply(ctx)?;
    tracker.advance(StepState::Verifying)?;
    let verification = step.verify(ctx)?;
    tracker.advance(StepState::Done)?;
    Ok(StepResult::Applied {
        verification,
        changes,
    })
}
