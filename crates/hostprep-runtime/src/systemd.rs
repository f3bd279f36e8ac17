use crate::command;
use crate::provider::{ServiceHealth, ServiceManager};
use crate::RuntimeError;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// [`ServiceManager`] driving systemd units through `systemctl`.
///
/// Units with a registered configuration test (sshd by default) are checked
/// before reloading, so a broken file is reported instead of taking the
/// daemon down.
pub struct Systemctl {
    config_tests: BTreeMap<String, Vec<String>>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new()
    }
}

impl Systemctl {
    pub fn new() -> Self {
        let mut config_tests = BTreeMap::new();
        for unit in ["ssh", "sshd"] {
            config_tests.insert(unit.to_owned(), vec!["sshd".to_owned(), "-t".to_owned()]);
        }
        Self {
            config_tests,
            poll_attempts: 10,
            poll_interval: Duration::from_millis(300),
        }
    }

    #[must_use]
    pub fn with_config_test(mut self, unit: &str, argv: &[&str]) -> Self {
        self.config_tests.insert(
            unit.to_owned(),
            argv.iter().map(|a| (*a).to_owned()).collect(),
        );
        self
    }

    fn run_config_test(&self, unit: &str) -> Result<Option<String>, RuntimeError> {
        let Some(argv) = self.config_tests.get(unit) else {
            return Ok(None);
        };
        let Some((program, args)) = argv.split_first() else {
            return Ok(None);
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = command::output(program, &args, &[])?;
        if out.status.success() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&out.stderr).trim().to_owned()))
        }
    }

    fn is_active(unit: &str) -> bool {
        command::output("systemctl", &["is-active", "--quiet", unit], &[])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl ServiceManager for Systemctl {
    fn reload(&self, unit: &str) -> Result<ServiceHealth, RuntimeError> {
        if let Some(reason) = self.run_config_test(unit)? {
            warn!("configuration test for {unit} failed; not reloading");
            return Ok(ServiceHealth::Unhealthy(format!(
                "configuration test failed: {reason}"
            )));
        }

        info!("reloading {unit}");
        let out = command::output("systemctl", &["reload-or-restart", unit], &[])?;
        if !out.status.success() {
            return Ok(ServiceHealth::Unhealthy(
                String::from_utf8_lossy(&out.stderr).trim().to_owned(),
            ));
        }

        for _ in 0..self.poll_attempts {
            if Self::is_active(unit) {
                return Ok(ServiceHealth::Healthy);
            }
            std::thread::sleep(self.poll_interval);
        }
        Ok(ServiceHealth::Unhealthy(format!(
            "{unit} is not active after reload"
        )))
    }
}
