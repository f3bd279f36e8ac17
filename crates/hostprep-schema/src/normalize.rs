use crate::pattern::FilePattern;
use crate::plan::{HostPlan, PlanError, ServiceSection, ToolSection};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Validated host plan with defaults resolved.
///
/// Tools, services and directives keep their declared order: the order of
/// `tools` is the order in which they are provisioned.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NormalizedPlan {
    pub min_free_mb: u64,
    pub free_space_path: PathBuf,
    pub account_user: Option<String>,
    pub tools: Vec<ToolSpec>,
    pub services: Vec<ServiceSpec>,
    pub directives: Vec<DirectiveSpec>,
    pub repository: Option<RepositorySpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub binary: String,
    pub package: String,
    pub apt_source: Option<AptSource>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AptSource {
    pub key_url: String,
    pub repo_line: String,
    pub list_name: String,
}

/// Where a daemon reads its configuration from, in precedence order:
/// the primary file, then every `include_pattern` match inside `include_dir`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub unit: String,
    pub primary: PathBuf,
    pub include_dir: Option<PathBuf>,
    pub include_pattern: FilePattern,
    pub fallback_file: String,
    pub live_check: LiveCheck,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LiveCheck {
    None,
    SshPassword,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirectiveSpec {
    pub service: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RepositorySpec {
    pub url: String,
    pub path: PathBuf,
}

impl HostPlan {
    /// Validate the plan and resolve it into its normalized form.
    pub fn normalize(&self) -> Result<NormalizedPlan, PlanError> {
        if self.plan_version != 1 {
            return Err(PlanError::UnsupportedVersion(self.plan_version));
        }

        let free_space_path = absolute_path(
            "preconditions.free_space_path",
            &self.preconditions.free_space_path,
        )?;

        let mut seen = BTreeSet::new();
        let mut tools = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            let spec = normalize_tool(tool)?;
            if !seen.insert(spec.name.clone()) {
                return Err(PlanError::Duplicate {
                    kind: "tool",
                    name: spec.name,
                });
            }
            tools.push(spec);
        }

        let mut seen = BTreeSet::new();
        let mut services = Vec::with_capacity(self.services.len());
        for service in &self.services {
            let spec = normalize_service(service)?;
            if !seen.insert(spec.name.clone()) {
                return Err(PlanError::Duplicate {
                    kind: "service",
                    name: spec.name,
                });
            }
            services.push(spec);
        }

        let mut seen = BTreeSet::new();
        let mut directives = Vec::with_capacity(self.directives.len());
        for directive in &self.directives {
            let service = directive.service.trim().to_owned();
            let name = directive.name.trim().to_owned();
            let value = directive.value.trim().to_owned();
            if name.is_empty() {
                return Err(PlanError::EmptyName("directive"));
            }
            if value.is_empty() {
                return Err(PlanError::EmptyDirectiveValue(name));
            }
            if !services.iter().any(|s| s.name == service) {
                return Err(PlanError::UnknownService {
                    directive: name,
                    service,
                });
            }
            // Directive keywords are case-insensitive in sshd-style files.
            if !seen.insert((service.clone(), name.to_ascii_lowercase())) {
                return Err(PlanError::Duplicate {
                    kind: "directive",
                    name,
                });
            }
            directives.push(DirectiveSpec {
                service,
                name,
                value,
            });
        }

        let repository = match &self.repository {
            Some(repo) => {
                let url = repo.url.trim().to_owned();
                if url.is_empty() {
                    return Err(PlanError::EmptyRepositoryUrl);
                }
                Some(RepositorySpec {
                    url,
                    path: absolute_path("repository.path", &repo.path)?,
                })
            }
            None => None,
        };

        let account_user = self
            .account
            .user
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_owned);

        Ok(NormalizedPlan {
            min_free_mb: self.preconditions.min_free_mb,
            free_space_path,
            account_user,
            tools,
            services,
            directives,
            repository,
        })
    }
}

impl NormalizedPlan {
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}

fn normalize_tool(tool: &ToolSection) -> Result<ToolSpec, PlanError> {
    let name = non_empty("tool", &tool.name)?;
    let binary = non_empty("tool binary", &tool.binary)?;
    let package = non_empty("tool package", &tool.package)?;
    let apt_source = match &tool.apt_source {
        Some(src) => Some(AptSource {
            key_url: non_empty("apt source key_url", &src.key_url)?,
            repo_line: non_empty("apt source repo_line", &src.repo_line)?,
            list_name: non_empty("apt source list_name", &src.list_name)?,
        }),
        None => None,
    };
    let group = tool
        .group
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_owned);
    Ok(ToolSpec {
        name,
        binary,
        package,
        apt_source,
        group,
    })
}

fn normalize_service(service: &ServiceSection) -> Result<ServiceSpec, PlanError> {
    let name = non_empty("service", &service.name)?;
    let unit = non_empty("service unit", &service.unit)?;
    let primary = absolute_path(&format!("service '{name}' primary"), &service.primary)?;
    let include_dir = match service.include_dir.as_deref().map(str::trim) {
        Some(dir) if !dir.is_empty() => {
            Some(absolute_path(&format!("service '{name}' include_dir"), dir)?)
        }
        _ => None,
    };
    let include_pattern = FilePattern::parse(service.include_pattern.trim())?;

    let fallback_file = service.fallback_file.trim().to_owned();
    if fallback_file.is_empty()
        || fallback_file.contains('/')
        || fallback_file == "."
        || fallback_file == ".."
    {
        return Err(PlanError::InvalidFallback(fallback_file));
    }
    // A fallback the include pattern skips would be re-created on every run.
    if include_dir.is_some() && !include_pattern.matches(&fallback_file) {
        return Err(PlanError::InvalidFallback(fallback_file));
    }

    let live_check = match service.live_check.trim().to_lowercase().as_str() {
        "none" => LiveCheck::None,
        "ssh-password" => LiveCheck::SshPassword,
        other => return Err(PlanError::UnknownLiveCheck(other.to_owned())),
    };

    Ok(ServiceSpec {
        name,
        unit,
        primary,
        include_dir,
        include_pattern,
        fallback_file,
        live_check,
    })
}

fn non_empty(kind: &'static str, value: &str) -> Result<String, PlanError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PlanError::EmptyName(kind));
    }
    Ok(trimmed.to_owned())
}

fn absolute_path(what: &str, value: &str) -> Result<PathBuf, PlanError> {
    let path = PathBuf::from(value.trim());
    if !path.is_absolute() {
        return Err(PlanError::RelativePath(what.to_owned()));
    }
    Ok(path)
}
