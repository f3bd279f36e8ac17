use super::{json_pretty, LoadedPlan, EXIT_FAILURE, EXIT_SUCCESS};
use hostprep_core::{CoreError, RunLock, DEFAULT_LOCK_PATH};
use hostprep_schema::NormalizedPlan;
use serde::Serialize;
use std::path::Path;

pub fn run(loaded: &LoadedPlan, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&mut checks, &mut all_pass);
    check_privileges(&mut checks);
    check_disk_space(&loaded.plan, &mut checks, &mut all_pass);

    let plan = &loaded.plan;
    checks.push(Check::info(
        "plan",
        &format!(
            "Plan {}: {} tools, {} services, {} directives{}",
            loaded.source,
            plan.tools.len(),
            plan.services.len(),
            plan.directives.len(),
            if plan.repository.is_some() {
                ", one repository"
            } else {
                ""
            }
        ),
    ));
    check_services(plan, &mut checks);
    check_lock(Path::new(DEFAULT_LOCK_PATH), &mut checks);

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = hostprep_runtime::check_host_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("host_prereqs", "Host tools available"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "host_prereqs",
            &hostprep_runtime::format_missing(&missing),
        ));
    }
}

fn check_privileges(checks: &mut Vec<Check>) {
    if hostprep_runtime::is_root() {
        checks.push(Check::pass("privileges", "Running as root"));
    } else {
        checks.push(Check::warn(
            "privileges",
            "Not running as root; apply needs sudo",
        ));
    }
}

fn check_disk_space(plan: &NormalizedPlan, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let path = plan.free_space_path.display();
    match hostprep_runtime::free_space_mb(&plan.free_space_path) {
        Some(avail) if avail < plan.min_free_mb => {
            *all_pass = false;
            checks.push(Check::fail(
                "disk_space",
                &format!(
                    "Low disk space on {path}: {avail} MB available, {} MB required",
                    plan.min_free_mb
                ),
            ));
        }
        Some(avail) => checks.push(Check::pass(
            "disk_space",
            &format!("Disk space on {path}: {avail} MB available"),
        )),
        None => checks.push(Check::warn(
            "disk_space",
            &format!("Cannot determine free space on {path}"),
        )),
    }
}

fn check_services(plan: &NormalizedPlan, checks: &mut Vec<Check>) {
    for service in &plan.services {
        let name = format!("service_{}", service.name);
        if service.primary.is_file() {
            checks.push(Check::pass(
                &name,
                &format!("{}: {} present", service.name, service.primary.display()),
            ));
        } else {
            checks.push(Check::warn(
                &name,
                &format!(
                    "{}: {} missing (will be created)",
                    service.name,
                    service.primary.display()
                ),
            ));
        }
    }
}

fn check_lock(lock_path: &Path, checks: &mut Vec<Check>) {
    match RunLock::try_acquire(lock_path) {
        Ok(_) => checks.push(Check::pass("run_lock", "No other hostprep run in progress")),
        Err(CoreError::Locked(_)) => checks.push(Check::warn(
            "run_lock",
            "Another hostprep run holds the lock",
        )),
        Err(e) => checks.push(Check::warn(
            "run_lock",
            &format!("Cannot check run lock: {e}"),
        )),
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("hostprep doctor\n");
        for check in checks {
            let icon = match check.status {
                Status::Pass => "✓",
                Status::Fail => "✗",
                Status::Warn => "⚠",
                Status::Info => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    status: Status,
    message: String,
}

impl Check {
    fn new(name: &str, status: Status, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, Status::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, Status::Fail, message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, Status::Warn, message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, Status::Info, message)
    }
}
