use super::{
    colorize_state, json_pretty, spin_fail, spin_ok, spinner, LoadedPlan, EXIT_FAILURE,
    EXIT_INTERRUPTED, EXIT_PRECONDITION, EXIT_SUCCESS,
};
use console::Style;
use hostprep_core::{
    resolve_account, AbortStage, CoreError, Engine, FailureKind, RunLock, RunOutcome, StepReport,
    StepResult, Verification, DEFAULT_LOCK_PATH,
};
use std::path::Path;

pub fn run(loaded: &LoadedPlan, json: bool) -> Result<u8, String> {
    let _lock = RunLock::try_acquire(Path::new(DEFAULT_LOCK_PATH)).map_err(|e| match e {
        CoreError::Locked(_) => format!("precondition failed: {e}"),
        other => format!("precondition failed: cannot take run lock: {other}"),
    })?;
    converge(&Engine::system(&loaded.plan), loaded, json)
}

/// Preconditions are gated inside the run and surface as an aborted outcome.
fn converge(engine: &Engine, loaded: &LoadedPlan, json: bool) -> Result<u8, String> {
    let account = resolve_account(&loaded.plan);
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("provisioning host from {}...", loaded.source)))
    };
    let outcome = match engine.apply(&loaded.plan, account.as_deref()) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "provisioning failed");
            }
            return Err(e.to_string());
        }
    };
    if let Some(pb) = &pb {
        if outcome.is_converged() {
            spin_ok(pb, "host converged");
        } else {
            spin_fail(pb, "provisioning aborted");
        }
    }

    if json {
        println!("{}", json_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(exit_code(&outcome))
}

pub fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome.failure_kind() {
        None => EXIT_SUCCESS,
        Some(FailureKind::Precondition) => EXIT_PRECONDITION,
        Some(FailureKind::Interrupted) => EXIT_INTERRUPTED,
        Some(_) => EXIT_FAILURE,
    }
}

fn print_outcome(outcome: &RunOutcome) {
    for report in outcome.steps() {
        println!("  {}", step_line(report));
        if let Some(StepResult::Applied { changes, .. }) = &report.result {
            for change in &changes.files {
                match &change.backup {
                    Some(backup) => println!(
                        "      {} (backup: {})",
                        change.path.display(),
                        backup.display()
                    ),
                    None if change.created => println!("      {} (created)", change.path.display()),
                    None => println!("      {}", change.path.display()),
                }
            }
            for removed in &changes.removed {
                println!("      {} (replaced)", removed.display());
            }
        }
    }
    println!();

    let applied = outcome.applied_count();
    match outcome {
        RunOutcome::Converged { steps, backups } => {
            println!(
                "converged: {applied} of {} steps applied, {} backups taken",
                steps.len(),
                backups.len()
            );
            let unconfirmed = outcome.unconfirmed();
            if !unconfirmed.is_empty() {
                let warn = Style::new().yellow();
                for report in unconfirmed {
                    eprintln!(
                        "{} step {} ({}) could not be confirmed live",
                        warn.apply_to("warning:"),
                        report.position,
                        report.name
                    );
                }
            }
        }
        RunOutcome::Aborted {
            stage,
            kind,
            reason,
            ..
        } => {
            let red = Style::new().red().bold();
            let at = match stage {
                AbortStage::Preconditions => "before any step".to_owned(),
                AbortStage::Step { position, name } => format!("at step {position} ({name})"),
                AbortStage::BeforeStep { position } => format!("before step {position}"),
            };
            eprintln!("{} {kind} failure {at}: {reason}", red.apply_to("error:"));
            eprintln!("fix the condition and re-run hostprep; completed steps are kept");
        }
    }
}

fn step_line(report: &StepReport) -> String {
    let state = colorize_state(&report.state.to_string());
    match &report.result {
        Some(StepResult::AlreadySatisfied) => {
            format!("✓ {} [{state}]", report.name)
        }
        Some(StepResult::Applied {
            verification: Verification::Confirmed,
            ..
        }) => format!("✓ {} [{state}] applied", report.name),
        Some(StepResult::Applied {
            verification: Verification::Unconfirmed(reason),
            ..
        }) => format!("⚠ {} [{state}] applied, unconfirmed: {reason}", report.name),
        Some(StepResult::Failed { kind, reason }) => {
            format!("✗ {} [{state}] {kind}: {reason}", report.name)
        }
        None => format!("· {} [{state}]", report.name),
    }
}
