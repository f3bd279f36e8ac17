//! Idempotent provisioning engine for hostprep.
//!
//! This crate turns a normalized host plan into an ordered list of steps and
//! drives them fail-fast through the `Engine`. Each step probes whether its
//! capability already holds, applies itself when it does not, then verifies.
//! Configuration directives are found by the locator across a service's
//! competing sources and enforced by the mutator, which snapshots every file
//! before rewriting it.

pub mod concurrency;
pub mod directive;
pub mod engine;
pub mod lifecycle;
pub mod locator;
pub mod mutator;
pub mod probe;
pub mod step;

pub use concurrency::{install_signal_handler, shutdown_requested, RunLock, DEFAULT_LOCK_PATH};
pub use engine::{
    build_steps, resolve_account, AbortStage, BackupListing, Engine, FreeSpace, Precondition,
    Privileges, RunOutcome, StepPreview, StepReport, StepResult,
};
pub use lifecycle::{validate_transition, StepState, StepTracker};
pub use locator::{
    candidate_sources, fallback_target, locate, ConfigSource, Declaration, FallbackTarget,
    Located, LocatedSource, SourceKind,
};
pub use mutator::{Change, Enforcement, Mutator};
pub use probe::{Capability, Probe};
pub use step::{
    Changes, DirectiveStep, GroupStep, PackageStep, RepositoryStep, Step, StepContext,
    Verification,
};

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Failure classes a run can abort with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Precondition,
    Acquisition,
    ConfigMutation,
    ServiceUnhealthy,
    Verification,
    Interrupted,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Precondition => "precondition",
            FailureKind::Acquisition => "acquisition",
            FailureKind::ConfigMutation => "config-mutation",
            FailureKind::ServiceUnhealthy => "service-unhealthy",
            FailureKind::Verification => "verification",
            FailureKind::Interrupted => "interrupted",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("plan error: {0}")]
    Plan(#[from] hostprep_schema::PlanError),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("{what}: {source}")]
    Acquisition {
        what: String,
        source: hostprep_runtime::RuntimeError,
    },
    #[error("cannot update {path}: {source}")]
    ConfigMutation {
        path: PathBuf,
        source: hostprep_store::StoreError,
    },
    #[error("{unit} is not healthy after reload: {reason}")]
    ServiceUnhealthy { unit: String, reason: String },
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("store error: {0}")]
    Store(#[from] hostprep_store::StoreError),
    #[error("invalid step transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("another hostprep run holds {0}")]
    Locked(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CoreError::Precondition(_) | CoreError::Locked(_) => FailureKind::Precondition,
            CoreError::Acquisition { .. } => FailureKind::Acquisition,
            CoreError::ConfigMutation { .. } | CoreError::Store(_) | CoreError::Io(_) => {
                FailureKind::ConfigMutation
            }
            CoreError::ServiceUnhealthy { .. } => FailureKind::ServiceUnhealthy,
            CoreError::Verification(_) => FailureKind::Verification,
            CoreError::Plan(_) | CoreError::InvalidTransition { .. } | CoreError::UnknownService(_) => {
                FailureKind::Internal
            }
        }
    }
}
