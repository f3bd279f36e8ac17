pub mod apply;
pub mod backups;
pub mod completions;
pub mod doctor;
pub mod locate;
pub mod man_pages;
pub mod plan;
pub mod show_plan;

use hostprep_schema::{
    parse_plan_file, parse_plan_str, HostPlan, NormalizedPlan, RepositorySection, DEFAULT_PLAN,
    DEFAULT_PLAN_PATH,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_PLAN_ERROR: u8 = 2;
pub const EXIT_PRECONDITION: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 130;

pub fn json_pretty(value: &impl Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "done" => Style::new().green().apply_to(state).to_string(),
        "satisfied" => Style::new().green().dim().apply_to(state).to_string(),
        "failed" => Style::new().red().bold().apply_to(state).to_string(),
        "unstarted" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Where the effective plan came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanSource {
    File(PathBuf),
    BuiltIn,
}

impl std::fmt::Display for PlanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanSource::File(p) => write!(f, "{}", p.display()),
            PlanSource::BuiltIn => f.write_str("built-in default plan"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub path: Option<PathBuf>,
    pub repo_url: Option<String>,
    pub repo_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub source: PlanSource,
    /// The plan as written, with command-line overrides applied.
    pub raw: HostPlan,
    pub plan: NormalizedPlan,
}

/// `--plan`, else the default plan file if present, else the built-in plan.
pub fn load_plan(opts: &PlanOptions) -> Result<LoadedPlan, String> {
    let default_path = Path::new(DEFAULT_PLAN_PATH);
    let (source, parsed) = match &opts.path {
        Some(p) => (PlanSource::File(p.clone()), parse_plan_file(p)),
        None if default_path.exists() => (
            PlanSource::File(default_path.to_path_buf()),
            parse_plan_file(default_path),
        ),
        None => (PlanSource::BuiltIn, parse_plan_str(DEFAULT_PLAN)),
    };
    let mut raw = parsed.map_err(|e| format!("plan error: {source}: {e}"))?;
    apply_repo_override(&mut raw, opts.repo_url.as_deref(), opts.repo_path.as_deref())?;
    let plan = raw
        .normalize()
        .map_err(|e| format!("plan error: {source}: {e}"))?;
    Ok(LoadedPlan { source, raw, plan })
}

fn apply_repo_override(
    plan: &mut HostPlan,
    url: Option<&str>,
    path: Option<&Path>,
) -> Result<(), String> {
    if url.is_none() && path.is_none() {
        return Ok(());
    }
    let path = path.map(|p| p.to_string_lossy().into_owned());
    if let Some(repo) = plan.repository.as_mut() {
        if let Some(u) = url {
            u.clone_into(&mut repo.url);
        }
        if let Some(p) = path {
            repo.path = p;
        }
        return Ok(());
    }
    match (url, path) {
        (Some(url), Some(path)) => {
            plan.repository = Some(RepositorySection {
                url: url.to_owned(),
                path,
            });
            Ok(())
        }
        _ => Err(
            "plan error: the plan has no [repository]; give both --repo-url and --repo-path"
                .to_owned(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_plan(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("plan.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_PLAN_ERROR,
            EXIT_PRECONDITION,
            EXIT_INTERRUPTED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn explicit_plan_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            "plan_version = 1\n[[tools]]\nname = \"git\"\nbinary = \"git\"\npackage = \"git\"\n",
        );
        let loaded = load_plan(&PlanOptions {
            path: Some(path.clone()),
            ..PlanOptions::default()
        })
        .unwrap();
        assert_eq!(loaded.source, PlanSource::File(path));
        assert_eq!(loaded.plan.tools.len(), 1);
    }

    #[test]
    fn invalid_plan_is_a_plan_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(dir.path(), "plan_version = 7\n");
        let err = load_plan(&PlanOptions {
            path: Some(path),
            ..PlanOptions::default()
        })
        .unwrap_err();
        assert!(err.starts_with("plan error:"), "{err}");
    }

    #[test]
    fn repo_flags_add_repository() {
        let mut plan = parse_plan_str("plan_version = 1\n").unwrap();
        apply_repo_override(
            &mut plan,
            Some("https://example.com/ops.git"),
            Some(Path::new("/srv/ops")),
        )
        .unwrap();
        let repo = plan.repository.unwrap();
        assert_eq!(repo.url, "https://example.com/ops.git");
        assert_eq!(repo.path, "/srv/ops");
    }

    #[test]
    fn repo_url_alone_overrides_existing_section() {
        let mut plan = parse_plan_str(
            "plan_version = 1\n[repository]\nurl = \"https://a/x.git\"\npath = \"/srv/x\"\n",
        )
        .unwrap();
        apply_repo_override(&mut plan, Some("https://b/y.git"), None).unwrap();
        let repo = plan.repository.unwrap();
        assert_eq!(repo.url, "https://b/y.git");
        assert_eq!(repo.path, "/srv/x");
    }

    #[test]
    fn repo_url_alone_without_section_is_rejected() {
        let mut plan = parse_plan_str("plan_version = 1\n").unwrap();
        assert!(apply_repo_override(&mut plan, Some("https://b/y.git"), None).is_err());
    }

    #[test]
    fn colorize_state_keeps_text() {
        for state in ["done", "satisfied", "failed", "unstarted", "probing"] {
            assert!(colorize_state(state).contains(state));
        }
    }

    #[test]
    fn spinner_lifecycle() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
