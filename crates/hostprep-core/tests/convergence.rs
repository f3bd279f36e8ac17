use hostprep_core::{
    build_steps, locate, AbortStage, Changes, Engine, FailureKind, RunOutcome, Step, StepContext,
    StepResult, StepState, Verification,
};
use hostprep_runtime::{HostProviders, LiveCheckOutcome, MockHost};
use hostprep_schema::{parse_plan_str, NormalizedPlan, DEFAULT_PLAN};
use hostprep_store::{list_backups, FsEvent, MemoryFs, Snapshotter};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

const PRIMARY: &str = "/etc/ssh/sshd_config";
const INCLUDE_DIR: &str = "/etc/ssh/sshd_config.d";

const SSH_ONLY: &str = r#"
plan_version = 1

[[services]]
name = "ssh"
unit = "ssh"
primary = "/etc/ssh/sshd_config"
include_dir = "/etc/ssh/sshd_config.d"

[[directives]]
service = "ssh"
name = "PasswordAuthentication"
value = "yes"
"#;

fn plan(input: &str) -> NormalizedPlan {
    parse_plan_str(input).unwrap().normalize().unwrap()
}

fn engine(fs: &Arc<MemoryFs>, host: &Arc<MockHost>, stamp: &str) -> Engine {
    Engine::new(fs.clone(), HostProviders::mock(host), Snapshotter::new(stamp))
        .with_interrupt_check(|| false)
}

fn host_for(fs: &Arc<MemoryFs>) -> Arc<MockHost> {
    Arc::new(MockHost::with_fs(fs.clone()))
}

#[test]
fn password_auth_end_to_end() {
    let original = "Port 22\nPasswordAuthentication no\nUsePAM yes\n";
    let fs = Arc::new(MemoryFs::new().with_file(PRIMARY, original));
    let host = host_for(&fs);
    let p = plan(SSH_ONLY);

    let outcome = engine(&fs, &host, "20261019T101500").apply(&p, None).unwrap();

    assert!(outcome.is_converged(), "{outcome:?}");
    assert_eq!(
        fs.file(PRIMARY).as_deref(),
        Some("Port 22\nPasswordAuthentication yes\nUsePAM yes\n")
    );
    let backups = list_backups(fs.as_ref(), Path::new(PRIMARY)).unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs.file(&backups[0]).as_deref(), Some(original));
    assert_eq!(outcome.backups(), backups.as_slice());

    let located = locate(fs.as_ref(), p.service("ssh").unwrap(), "PasswordAuthentication").unwrap();
    assert_eq!(located.consistent_value(), Some("yes"));
    assert_eq!(host.calls(), vec!["reload ssh"]);
}

#[test]
fn second_run_changes_nothing_and_takes_no_backup() {
    let fs = Arc::new(
        MemoryFs::new()
            .with_file(PRIMARY, "PasswordAuthentication no\n")
            .with_file(format!("{INCLUDE_DIR}/50-cloud-init.conf"), "PasswordAuthentication no\n"),
    );
    let host = host_for(&fs);
    let p = plan(SSH_ONLY);

    let first = engine(&fs, &host, "20261019T101500").apply(&p, None).unwrap();
    assert!(first.is_converged());
    let files_after_first: Vec<(PathBuf, Option<String>)> =
        fs.files().into_iter().map(|f| (f.clone(), fs.file(&f))).collect();
    let journal_len = fs.journal().len();

    // Same second: identical stamp would collide if a backup were attempted.
    let second = engine(&fs, &host, "20261019T101500").apply(&p, None).unwrap();

    assert!(second.is_converged());
    assert_eq!(second.applied_count(), 0);
    assert!(matches!(
        second.steps()[0].result,
        Some(StepResult::AlreadySatisfied)
    ));
    assert_eq!(fs.journal().len(), journal_len);
    let files_after_second: Vec<(PathBuf, Option<String>)> =
        fs.files().into_iter().map(|f| (f.clone(), fs.file(&f))).collect();
    assert_eq!(files_after_first, files_after_second);
    assert_eq!(host.calls_starting_with("reload").len(), 1);
}

#[test]
fn conflicting_secondaries_are_all_resolved() {
    let fs = Arc::new(
        MemoryFs::new()
            .with_file(PRIMARY, "PasswordAuthentication no\n")
            .with_file(format!("{INCLUDE_DIR}/a.conf"), "PasswordAuthentication no\n")
            .with_file(format!("{INCLUDE_DIR}/b.conf"), "ClientAliveInterval 120\n"),
    );
    let host = host_for(&fs);
    let p = plan(SSH_ONLY);

    let outcome = engine(&fs, &host, "20261019T101500").apply(&p, None).unwrap();
    assert!(outcome.is_converged());

    assert_eq!(
        fs.file(format!("{INCLUDE_DIR}/a.conf")).as_deref(),
        Some("PasswordAuthentication yes\n")
    );
    assert_eq!(
        fs.file(format!("{INCLUDE_DIR}/b.conf")).as_deref(),
        Some("ClientAliveInterval 120\n")
    );
    let b = PathBuf::from(format!("{INCLUDE_DIR}/b.conf"));
    assert!(fs.journal().iter().all(|e| e.path() != b.as_path()));
    assert!(list_backups(fs.as_ref(), &b).unwrap().is_empty());

    let located = locate(fs.as_ref(), p.service("ssh").unwrap(), "PasswordAuthentication").unwrap();
    assert_eq!(located.declaring().count(), 2);
    assert_eq!(located.consistent_value(), Some("yes"));
}

#[test]
fn match_all_include_pattern_leaves_backups_alone() {
    let input = SSH_ONLY.replace(
        "include_dir = \"/etc/ssh/sshd_config.d\"",
        "include_dir = \"/etc/ssh/sshd_config.d\"\ninclude_pattern = \"*\"",
    );
    let cloud = format!("{INCLUDE_DIR}/50-cloud.conf");
    let fs = Arc::new(
        MemoryFs::new()
            .with_file(PRIMARY, "Port 22\n")
            .with_file(&cloud, "PasswordAuthentication no\n"),
    );
    let host = host_for(&fs);
    let p = plan(&input);

    let first = engine(&fs, &host, "20261019T101500").apply(&p, None).unwrap();
    assert!(first.is_converged(), "{first:?}");
    assert_eq!(fs.file(&cloud).as_deref(), Some("PasswordAuthentication yes\n"));
    let backups = list_backups(fs.as_ref(), Path::new(&cloud)).unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(
        fs.file(&backups[0]).as_deref(),
        Some("PasswordAuthentication no\n")
    );

    let located = locate(fs.as_ref(), p.service("ssh").unwrap(), "PasswordAuthentication").unwrap();
    assert!(located.sources.iter().all(|s| s.source.path != backups[0]));
    assert_eq!(located.consistent_value(), Some("yes"));

    let journal_len = fs.journal().len();
    let second = engine(&fs, &host, "20261019T101600").apply(&p, None).unwrap();
    assert!(second.is_converged(), "{second:?}");
    assert_eq!(second.applied_count(), 0);
    assert!(second.backups().is_empty());
    assert_eq!(fs.journal().len(), journal_len);
    assert_eq!(
        fs.file(&backups[0]).as_deref(),
        Some("PasswordAuthentication no\n")
    );
    assert_eq!(list_backups(fs.as_ref(), Path::new(&cloud)).unwrap(), backups);
}

#[test]
fn backups_precede_every_mutation() {
    let fs = Arc::new(
        MemoryFs::new()
            .with_file(PRIMARY, "PasswordAuthentication no\n")
            .with_file(format!("{INCLUDE_DIR}/a.conf"), "PasswordAuthentication no\n"),
    );
    let host = host_for(&fs);

    let outcome = engine(&fs, &host, "20261019T101500")
        .apply(&plan(SSH_ONLY), None)
        .unwrap();
    assert!(outcome.is_converged());

    let journal = fs.journal();
    for source in [PathBuf::from(PRIMARY), PathBuf::from(format!("{INCLUDE_DIR}/a.conf"))] {
        let backups = list_backups(fs.as_ref(), &source).unwrap();
        assert_eq!(backups.len(), 1);
        let backup_at = journal
            .iter()
            .position(|e| *e == FsEvent::Create(backups[0].clone()))
            .unwrap();
        let write_at = journal
            .iter()
            .position(|e| *e == FsEvent::Write(source.clone()))
            .unwrap();
        assert!(backup_at < write_at, "backup of {} after write", source.display());
        assert_eq!(
            fs.file(&backups[0]).as_deref(),
            Some("PasswordAuthentication no\n")
        );
    }
}

#[test]
fn undeclared_directive_lands_in_fallback_file() {
    let fs = Arc::new(
        MemoryFs::new()
            .with_file(PRIMARY, "Port 22\nInclude /etc/ssh/sshd_config.d/*.conf\n")
            .with_dir(INCLUDE_DIR),
    );
    let host = host_for(&fs);

    let outcome = engine(&fs, &host, "20261019T101500")
        .apply(&plan(SSH_ONLY), None)
        .unwrap();
    assert!(outcome.is_converged());

    let fallback = format!("{INCLUDE_DIR}/99-hostprep.conf");
    let content = fs.file(&fallback).unwrap();
    assert_eq!(content.matches("PasswordAuthentication yes").count(), 1);
    assert_eq!(
        fs.file(PRIMARY).as_deref(),
        Some("Port 22\nInclude /etc/ssh/sshd_config.d/*.conf\n")
    );
    assert_eq!(fs.journal(), vec![FsEvent::Create(PathBuf::from(&fallback))]);
    assert!(outcome.backups().is_empty());
}

struct Scripted {
    name: String,
    fail: bool,
    log: Rc<RefCell<Vec<String>>>,
}

impl Step for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> hostprep_core::Capability {
        hostprep_core::Capability::Binary(self.name.clone())
    }

    fn probe(&self, _ctx: &StepContext<'_>) -> Result<bool, hostprep_core::CoreError> {
        self.log.borrow_mut().push(format!("probe {}", self.name));
        Ok(false)
    }

    fn apply(&self, _ctx: &StepContext<'_>) -> Result<Changes, hostprep_core::CoreError> {
        self.log.borrow_mut().push(format!("apply {}", self.name));
        if self.fail {
            return Err(hostprep_core::CoreError::Verification(format!(
                "{} exploded",
                self.name
            )));
        }
        Ok(Changes::default())
    }

    fn verify(&self, _ctx: &StepContext<'_>) -> Result<Verification, hostprep_core::CoreError> {
        Ok(Verification::Confirmed)
    }
}

#[test]
fn failure_at_step_three_of_six_stops_the_run() {
    let fs = Arc::new(MemoryFs::new());
    let host = host_for(&fs);
    let log = Rc::new(RefCell::new(Vec::new()));
    let steps: Vec<Box<dyn Step>> = (1..=6)
        .map(|i| {
            Box::new(Scripted {
                name: format!("step-{i}"),
                fail: i == 3,
                log: log.clone(),
            }) as Box<dyn Step>
        })
        .collect();

    let outcome = engine(&fs, &host, "20261019T101500").run(&steps);

    match &outcome {
        RunOutcome::Aborted {
            stage, kind, reason, ..
        } => {
            assert_eq!(
                *stage,
                AbortStage::Step {
                    position: 3,
                    name: "step-3".to_owned()
                }
            );
            assert_eq!(*kind, FailureKind::Verification);
            assert!(reason.contains("step-3 exploded"));
        }
        RunOutcome::Converged { .. } => panic!("run should abort"),
    }
    assert!(log.borrow().iter().all(|l| !l.ends_with("step-4")
        && !l.ends_with("step-5")
        && !l.ends_with("step-6")));
    let states: Vec<StepState> = outcome.steps().iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            StepState::Done,
            StepState::Done,
            StepState::Failed,
            StepState::Unstarted,
            StepState::Unstarted,
            StepState::Unstarted,
        ]
    );
    assert_eq!(
        outcome.steps()[2].trail,
        vec![
            StepState::Unstarted,
            StepState::Probing,
            StepState::Applying,
            StepState::Failed
        ]
    );
}

#[test]
fn failed_install_aborts_before_later_tools() {
    let fs = Arc::new(MemoryFs::new().with_file(PRIMARY, "PasswordAuthentication no\n"));
    let host = host_for(&fs);
    host.package_provides("docker-ce", "docker");
    host.fail_on("install tailscale");

    let p = plan(DEFAULT_PLAN);
    let outcome = engine(&fs, &host, "20261019T101500").apply(&p, None).unwrap();

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Acquisition));
    assert!(host.calls_starting_with("install cloudflared").is_empty());
    assert!(host.calls_starting_with("reload").is_empty());
    assert_eq!(fs.file(PRIMARY).as_deref(), Some("PasswordAuthentication no\n"));
}

#[test]
fn unhealthy_reload_aborts_with_service_unhealthy() {
    let fs = Arc::new(MemoryFs::new().with_file(PRIMARY, "PasswordAuthentication no\n"));
    let host = host_for(&fs);
    host.set_unhealthy("ssh");

    let outcome = engine(&fs, &host, "20261019T101500")
        .apply(&plan(SSH_ONLY), None)
        .unwrap();

    assert_eq!(outcome.failure_kind(), Some(FailureKind::ServiceUnhealthy));
    // The edit and its backup stay in place for the operator.
    assert_eq!(outcome.backups().len(), 1);
}

#[test]
fn inconclusive_live_check_converges_unconfirmed() {
    let fs = Arc::new(MemoryFs::new().with_file(PRIMARY, "PasswordAuthentication no\n"));
    let host = host_for(&fs);
    host.set_live_outcome(LiveCheckOutcome::Inconclusive("connection refused".to_owned()));
    let input = SSH_ONLY.replace(
        "include_dir = \"/etc/ssh/sshd_config.d\"",
        "include_dir = \"/etc/ssh/sshd_config.d\"\nlive_check = \"ssh-password\"",
    );

    let outcome = engine(&fs, &host, "20261019T101500")
        .apply(&plan(&input), None)
        .unwrap();

    assert!(outcome.is_converged());
    let unconfirmed = outcome.unconfirmed();
    assert_eq!(unconfirmed.len(), 1);
    assert_eq!(unconfirmed[0].state, StepState::Done);
}

#[test]
fn default_plan_converges_on_fresh_host() {
    let fs = Arc::new(
        MemoryFs::new()
            .with_file(PRIMARY, "PasswordAuthentication no\n")
            .with_dir(INCLUDE_DIR),
    );
    let host = host_for(&fs);
    host.package_provides("docker-ce", "docker");
    let input = format!(
        "{DEFAULT_PLAN}\n[repository]\nurl = \"https://example.com/ops.git\"\npath = \"/srv/ops\"\n"
    );
    let p = plan(&input);
    let steps = build_steps(&p, Some("deploy")).unwrap();
    let eng = engine(&fs, &host, "20261019T101500");

    let outcome = eng.run(&steps);
    assert!(outcome.is_converged(), "{outcome:?}");
    assert!(fs.file("/srv/ops/.git/HEAD").is_some());
    assert_eq!(host.calls_starting_with("usermod deploy docker").len(), 1);

    // Rerun: everything but the repository is already satisfied.
    let again = eng.run(&steps);
    assert!(again.is_converged());
    assert_eq!(again.applied_count(), 1);
    assert_eq!(host.calls_starting_with("clone ").len(), 2);
}

#[test]
fn outcome_serializes_for_reporting() {
    let fs = Arc::new(MemoryFs::new().with_file(PRIMARY, "PasswordAuthentication no\n"));
    let host = host_for(&fs);
    let outcome = engine(&fs, &host, "20261019T101500")
        .apply(&plan(SSH_ONLY), None)
        .unwrap();
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "converged");
    assert_eq!(json["steps"][0]["state"], "done");
    assert_eq!(json["steps"][0]["result"]["result"], "applied");
    assert_eq!(
        json["steps"][0]["result"]["verification"]["status"],
        "confirmed"
    );
}
