//! Host collaborators for hostprep.
//!
//! This crate implements everything the engine delegates to the host: the
//! package provider (apt, with repository keys fetched over HTTPS), service
//! reloads through systemctl, group membership through usermod, repository
//! clones through git, binary lookup on the search path, the live SSH
//! password-login check, and host prerequisite / free-space probing. A
//! recording `MockHost` stands in for all of them in tests.

pub mod accounts;
pub mod apt;
pub mod command;
pub mod git;
pub mod mock;
pub mod prereq;
pub mod provider;
pub mod ssh;
pub mod systemd;

pub use accounts::UnixAccounts;
pub use apt::AptProvider;
pub use git::GitMaterializer;
pub use mock::MockHost;
pub use prereq::{
    check_host_prereqs, format_missing, free_space_mb, is_root, MissingPrereq, SearchPath,
};
pub use provider::{
    AccountManager, BinaryLocator, HostProviders, LiveCheckOutcome, LiveChecker,
    PackageProvider, RepoMaterializer, ServiceHealth, ServiceManager,
};
pub use ssh::SshLiveChecker;
pub use systemd::Systemctl;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("'{command}' failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },
    #[error("cannot determine host {0}")]
    HostDetection(String),
    #[error("filesystem error: {0}")]
    Store(#[from] hostprep_store::StoreError),
}
