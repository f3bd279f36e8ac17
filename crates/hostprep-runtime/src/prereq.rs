use crate::provider::BinaryLocator;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(name)))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Binary lookup on the process search path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPath;

impl BinaryLocator for SearchPath {
    fn has_binary(&self, name: &str) -> bool {
        command_exists(name)
    }
}

/// Check the tools hostprep itself drives. Empty list means all are present.
pub fn check_host_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("apt-get") || !command_exists("dpkg") {
        missing.push(MissingPrereq {
            name: "apt-get",
            purpose: "installing packages",
            install_hint: "hostprep supports Debian and Ubuntu hosts only",
        });
    }

    if !command_exists("systemctl") {
        missing.push(MissingPrereq {
            name: "systemctl",
            purpose: "reloading reconfigured services",
            install_hint: "hostprep requires a systemd host",
        });
    }

    if !command_exists("usermod") || !command_exists("id") {
        missing.push(MissingPrereq {
            name: "usermod",
            purpose: "granting group membership",
            install_hint: "apt install passwd",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nhostprep drives these tools to provision the host.");
    msg
}

#[allow(unsafe_code)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Megabytes available to unprivileged users on the filesystem holding
/// `path`, or `None` if it cannot be determined.
pub fn free_space_mb(path: &Path) -> Option<u64> {
    let c_path = std::ffi::CString::new(path.to_string_lossy().as_bytes()).ok()?;

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: statvfs with a valid, NUL-terminated path and a properly
    // zeroed output struct is well-defined; the struct is only read after
    // the call succeeds.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return None;
    }

    #[allow(clippy::unnecessary_cast)]
    let avail_bytes = stat.f_bavail as u64 * stat.f_frsize as u64;
    Some(avail_bytes / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "systemctl",
            purpose: "reloading services",
            install_hint: "use a systemd host",
        };
        let s = format!("{m}");
        assert!(s.contains("systemctl"));
        assert!(s.contains("reloading services"));
        assert!(s.contains("use a systemd host"));
    }

    #[test]
    fn format_missing_lists_every_item() {
        let items = vec![
            MissingPrereq {
                name: "apt-get",
                purpose: "packages",
                install_hint: "debian",
            },
            MissingPrereq {
                name: "usermod",
                purpose: "groups",
                install_hint: "apt install passwd",
            },
        ];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("apt-get"));
        assert!(output.contains("usermod"));
    }

    #[test]
    fn free_space_of_tempdir_is_known() {
        let dir = tempfile::tempdir().unwrap();
        assert!(free_space_mb(dir.path()).is_some());
    }

    #[test]
    fn free_space_of_missing_path_is_none() {
        assert!(free_space_mb(Path::new("/hostprep/does/not/exist")).is_none());
    }

    #[test]
    fn search_path_finds_sh() {
        assert!(SearchPath.has_binary("sh"));
        assert!(!SearchPath.has_binary("hostprep-definitely-not-a-binary"));
    }
}
