use crate::command;
use crate::provider::{LiveCheckOutcome, LiveChecker};
use hostprep_schema::LiveCheck;
use tracing::debug;

/// Verifies password logins against the local sshd.
///
/// Two probes: the daemon's effective configuration (`sshd -T`) and a
/// non-interactive connection whose rejection message lists the
/// authentication methods the server offers.
#[derive(Debug, Clone)]
pub struct SshLiveChecker {
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u32,
}

impl Default for SshLiveChecker {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 22,
            connect_timeout_secs: 5,
        }
    }
}

impl SshLiveChecker {
    fn effective_setting(key: &str) -> Option<String> {
        let out = command::output("sshd", &["-T"], &[]).ok()?;
        if !out.status.success() {
            return None;
        }
        effective_value(&String::from_utf8_lossy(&out.stdout), key)
    }

    fn offered_methods(&self) -> Result<Vec<String>, String> {
        let port = self.port.to_string();
        let timeout = format!("ConnectTimeout={}", self.connect_timeout_secs);
        let args = [
            "-o",
            "BatchMode=yes",
            "-o",
            "PubkeyAuthentication=no",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            timeout.as_str(),
            "-p",
            port.as_str(),
            self.host.as_str(),
            "true",
        ];
        let out = command::output("ssh", &args, &[]).map_err(|e| e.to_string())?;
        let stderr = String::from_utf8_lossy(&out.stderr);
        debug!("ssh probe stderr: {}", stderr.trim());
        parse_offered_methods(&stderr).ok_or_else(|| {
            let line = stderr.lines().last().unwrap_or("").trim();
            if line.is_empty() {
                "ssh probe produced no authentication response".to_owned()
            } else {
                format!("ssh probe: {line}")
            }
        })
    }

    fn check_password_login(&self) -> LiveCheckOutcome {
        if let Some(value) = Self::effective_setting("passwordauthentication") {
            if !value.eq_ignore_ascii_case("yes") {
                return LiveCheckOutcome::Inconclusive(format!(
                    "sshd effective configuration reports passwordauthentication {value}"
                ));
            }
        }
        match self.offered_methods() {
            Ok(methods) if methods.iter().any(|m| m == "password") => {
                LiveCheckOutcome::Confirmed
            }
            Ok(methods) => LiveCheckOutcome::Inconclusive(format!(
                "{}:{} offers only: {}",
                self.host,
                self.port,
                methods.join(",")
            )),
            Err(reason) => LiveCheckOutcome::Inconclusive(reason),
        }
    }
}

impl LiveChecker for SshLiveChecker {
    fn check(&self, kind: LiveCheck) -> LiveCheckOutcome {
        match kind {
            LiveCheck::None => LiveCheckOutcome::Skipped,
            LiveCheck::SshPassword => self.check_password_login(),
        }
    }
}

/// Value of `key` in `sshd -T` output (lower-case keywords, one per line).
pub fn effective_value(dump: &str, key: &str) -> Option<String> {
    dump.lines().find_map(|line| {
        let (k, v) = line.trim().split_once(' ')?;
        k.eq_ignore_ascii_case(key).then(|| v.trim().to_owned())
    })
}

/// Methods listed in `Permission denied (publickey,password).`
pub fn parse_offered_methods(stderr: &str) -> Option<Vec<String>> {
    let start = stderr.rfind("Permission denied (")? + "Permission denied (".len();
    let rest = &stderr[start..];
    let end = rest.find(')')?;
    Some(
        rest[..end]
            .split(',')
            .map(|m| m.trim().to_owned())
            .filter(|m| !m.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_methods_from_rejection() {
        let stderr = "Warning: Permanently added 'localhost' (ED25519) to the list of known hosts.\r\n\
                      root@localhost: Permission denied (publickey,password).\r\n";
        assert_eq!(
            parse_offered_methods(stderr).unwrap(),
            vec!["publickey", "password"]
        );
    }

    #[test]
    fn no_rejection_line_is_none() {
        let stderr = "ssh: connect to host localhost port 22: Connection refused";
        assert!(parse_offered_methods(stderr).is_none());
    }

    #[test]
    fn reads_effective_value() {
        let dump = "port 22\npasswordauthentication yes\npubkeyauthentication yes\n";
        assert_eq!(
            effective_value(dump, "PasswordAuthentication").as_deref(),
            Some("yes")
        );
        assert!(effective_value(dump, "usepam").is_none());
    }

    #[test]
    fn none_check_is_skipped() {
        assert_eq!(
            SshLiveChecker::default().check(LiveCheck::None),
            LiveCheckOutcome::Skipped
        );
    }

    #[test]
    fn unreachable_port_is_inconclusive_not_confirmed() {
        let checker = SshLiveChecker {
            host: "127.0.0.1".to_owned(),
            port: 1,
            connect_timeout_secs: 1,
        };
        assert_ne!(
            checker.check(LiveCheck::SshPassword),
            LiveCheckOutcome::Confirmed
        );
    }
}
