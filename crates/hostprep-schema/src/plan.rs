use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to read plan file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse plan: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported plan_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("{0} name must not be empty")]
    EmptyName(&'static str),
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },
    #[error("directive '{directive}' references unknown service '{service}'")]
    UnknownService { directive: String, service: String },
    #[error("directive '{0}' must have a non-empty value")]
    EmptyDirectiveValue(String),
    #[error("invalid include pattern '{0}': must be a file name pattern without '/'")]
    InvalidPattern(String),
    #[error("invalid fallback file '{0}': must be a plain file name")]
    InvalidFallback(String),
    #[error("path for {0} must be absolute")]
    RelativePath(String),
    #[error("repository url must not be empty")]
    EmptyRepositoryUrl,
    #[error("unknown live check '{0}', expected 'none' or 'ssh-password'")]
    UnknownLiveCheck(String),
}

/// Host plan as written by the operator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HostPlan {
    pub plan_version: u32,
    #[serde(default)]
    pub preconditions: PreconditionSection,
    #[serde(default)]
    pub account: AccountSection,
    #[serde(default)]
    pub tools: Vec<ToolSection>,
    #[serde(default)]
    pub services: Vec<ServiceSection>,
    #[serde(default)]
    pub directives: Vec<DirectiveSection>,
    #[serde(default)]
    pub repository: Option<RepositorySection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PreconditionSection {
    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,
    #[serde(default = "default_free_space_path")]
    pub free_space_path: String,
}

impl Default for PreconditionSection {
    fn default() -> Self {
        Self {
            min_free_mb: default_min_free_mb(),
            free_space_path: default_free_space_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AccountSection {
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolSection {
    pub name: String,
    pub binary: String,
    pub package: String,
    #[serde(default)]
    pub apt_source: Option<AptSourceSection>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AptSourceSection {
    pub key_url: String,
    pub repo_line: String,
    pub list_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub name: String,
    pub unit: String,
    pub primary: String,
    #[serde(default)]
    pub include_dir: Option<String>,
    #[serde(default = "default_include_pattern")]
    pub include_pattern: String,
    #[serde(default = "default_fallback_file")]
    pub fallback_file: String,
    #[serde(default = "default_live_check")]
    pub live_check: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DirectiveSection {
    pub service: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepositorySection {
    pub url: String,
    pub path: String,
}

fn default_min_free_mb() -> u64 {
    1024
}

fn default_free_space_path() -> String {
    "/".to_owned()
}

fn default_include_pattern() -> String {
    "*.conf".to_owned()
}

fn default_fallback_file() -> String {
    "99-hostprep.conf".to_owned()
}

fn default_live_check() -> String {
    "none".to_owned()
}

pub fn parse_plan_str(input: &str) -> Result<HostPlan, PlanError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_plan_file(path: impl AsRef<Path>) -> Result<HostPlan, PlanError> {
    let content = fs::read_to_string(path)?;
    parse_plan_str(&content)
}
