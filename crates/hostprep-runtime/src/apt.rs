use crate::command;
use crate::provider::PackageProvider;
use crate::RuntimeError;
use hostprep_schema::AptSource;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

/// Values substituted into apt source templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVars {
    pub codename: String,
    pub arch: String,
}

/// [`PackageProvider`] for Debian-family hosts.
///
/// Repository keys are fetched over HTTPS and stored under `keyring_dir`;
/// source lists go to `sources_dir`. The package index is refreshed once
/// before the first install and again after any source is added.
pub struct AptProvider {
    agent: ureq::Agent,
    keyring_dir: PathBuf,
    sources_dir: PathBuf,
    os_release: PathBuf,
    index_stale: AtomicBool,
}

impl Default for AptProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AptProvider {
    pub fn new() -> Self {
        Self::with_paths(
            "/etc/apt/keyrings",
            "/etc/apt/sources.list.d",
            "/etc/os-release",
        )
    }

    pub fn with_paths(
        keyring_dir: impl Into<PathBuf>,
        sources_dir: impl Into<PathBuf>,
        os_release: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            keyring_dir: keyring_dir.into(),
            sources_dir: sources_dir.into(),
            os_release: os_release.into(),
            index_stale: AtomicBool::new(true),
        }
    }

    pub fn list_path(&self, list_name: &str) -> PathBuf {
        self.sources_dir.join(format!("{list_name}.list"))
    }

    /// Keyring already on disk for `list_name`, whichever encoding it has.
    pub fn existing_keyring(&self, list_name: &str) -> Option<PathBuf> {
        ["asc", "gpg"]
            .iter()
            .map(|ext| self.keyring_dir.join(format!("{list_name}.{ext}")))
            .find(|p| p.is_file())
    }

    fn host_vars(&self) -> Result<HostVars, RuntimeError> {
        let release = fs::read_to_string(&self.os_release)?;
        let codename = parse_codename(&release)
            .ok_or_else(|| RuntimeError::HostDetection("release codename".to_owned()))?;
        let arch = command::run("dpkg", &["--print-architecture"], &[])?;
        if arch.is_empty() {
            return Err(RuntimeError::HostDetection("architecture".to_owned()));
        }
        Ok(HostVars { codename, arch })
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, RuntimeError> {
        debug!("GET {url}");
        let resp = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RuntimeError::Download {
                    url: url.to_owned(),
                    reason: format!("HTTP {code}"),
                });
            }
            Err(e) => {
                return Err(RuntimeError::Download {
                    url: url.to_owned(),
                    reason: e.to_string(),
                });
            }
        };
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RuntimeError::Download {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        if body.is_empty() {
            return Err(RuntimeError::Download {
                url: url.to_owned(),
                reason: "empty response".to_owned(),
            });
        }
        Ok(body)
    }
}

impl PackageProvider for AptProvider {
    fn name(&self) -> &str {
        "apt"
    }

    fn ensure_apt_source(&self, source: &AptSource) -> Result<(), RuntimeError> {
        let vars = self.host_vars()?;
        let list_path = self.list_path(&source.list_name);

        if let Some(keyring) = self.existing_keyring(&source.list_name) {
            let expected = source_list_content(&source.repo_line, &vars, &keyring);
            if fs::read_to_string(&list_path).ok().as_deref() == Some(expected.as_str()) {
                debug!("apt source '{}' already registered", source.list_name);
                return Ok(());
            }
        }

        let key_url = fill_placeholders(&source.key_url, &vars, &self.keyring_dir);
        let key = self.download(&key_url)?;
        let ext = if is_armored(&key) { "asc" } else { "gpg" };
        let keyring = self.keyring_dir.join(format!("{}.{ext}", source.list_name));

        fs::create_dir_all(&self.keyring_dir)?;
        write_file_atomic(&keyring, &key)?;

        let content = source_list_content(&source.repo_line, &vars, &keyring);
        fs::create_dir_all(&self.sources_dir)?;
        write_file_atomic(&list_path, content.as_bytes())?;
        self.index_stale.store(true, Ordering::SeqCst);

        info!(
            "registered apt source '{}' ({})",
            source.list_name,
            list_path.display()
        );
        Ok(())
    }

    fn ensure_package(&self, package: &str) -> Result<(), RuntimeError> {
        if self.index_stale.swap(false, Ordering::SeqCst) {
            info!("refreshing package index");
            if let Err(e) = command::run("apt-get", &["update"], APT_ENV) {
                self.index_stale.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
        info!("installing package {package}");
        command::run("apt-get", &["install", "-y", package], APT_ENV)?;
        Ok(())
    }
}

/// `VERSION_CODENAME` (or `UBUNTU_CODENAME`) from an os-release file.
pub fn parse_codename(os_release: &str) -> Option<String> {
    let mut ubuntu = None;
    for line in os_release.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "VERSION_CODENAME" => return Some(value.to_owned()),
            "UBUNTU_CODENAME" => ubuntu = Some(value.to_owned()),
            _ => {}
        }
    }
    ubuntu
}

/// Substitute `{codename}`, `{arch}` and `{keyring}` in a template.
pub fn fill_placeholders(template: &str, vars: &HostVars, keyring: &Path) -> String {
    template
        .replace("{codename}", &vars.codename)
        .replace("{arch}", &vars.arch)
        .replace("{keyring}", &keyring.to_string_lossy())
}

fn source_list_content(repo_line: &str, vars: &HostVars, keyring: &Path) -> String {
    format!("{}\n", fill_placeholders(repo_line, vars, keyring))
}

fn is_armored(key: &[u8]) -> bool {
    key.starts_with(b"-----BEGIN PGP")
}

fn write_file_atomic(path: &Path, data: &[u8]) -> Result<(), RuntimeError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o644))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RuntimeError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HostVars {
        HostVars {
            codename: "noble".to_owned(),
            arch: "amd64".to_owned(),
        }
    }

    #[test]
    fn parses_version_codename() {
        let release = "NAME=\"Ubuntu\"\nVERSION_CODENAME=noble\nUBUNTU_CODENAME=noble\n";
        assert_eq!(parse_codename(release).as_deref(), Some("noble"));
    }

    #[test]
    fn falls_back_to_ubuntu_codename() {
        let release = "NAME=\"Linux Mint\"\nVERSION_CODENAME=\nUBUNTU_CODENAME=\"jammy\"\n";
        assert_eq!(parse_codename(release).as_deref(), Some("jammy"));
    }

    #[test]
    fn missing_codename_is_none() {
        assert!(parse_codename("NAME=Debian\n").is_none());
    }

    #[test]
    fn fills_all_placeholders() {
        let line = fill_placeholders(
            "deb [arch={arch} signed-by={keyring}] https://download.docker.com/linux/ubuntu {codename} stable",
            &vars(),
            Path::new("/etc/apt/keyrings/docker.asc"),
        );
        assert_eq!(
            line,
            "deb [arch=amd64 signed-by=/etc/apt/keyrings/docker.asc] https://download.docker.com/linux/ubuntu noble stable"
        );
    }

    #[test]
    fn detects_armored_keys() {
        assert!(is_armored(b"-----BEGIN PGP PUBLIC KEY BLOCK-----\n"));
        assert!(!is_armored(&[0x99, 0x01, 0x0d]));
    }

    #[test]
    fn existing_keyring_prefers_either_extension() {
        let dir = tempfile::tempdir().unwrap();
        let apt = AptProvider::with_paths(
            dir.path().join("keyrings"),
            dir.path().join("sources"),
            dir.path().join("os-release"),
        );
        assert!(apt.existing_keyring("tailscale").is_none());
        fs::create_dir_all(dir.path().join("keyrings")).unwrap();
        fs::write(dir.path().join("keyrings/tailscale.gpg"), [0x99]).unwrap();
        assert_eq!(
            apt.existing_keyring("tailscale"),
            Some(dir.path().join("keyrings/tailscale.gpg"))
        );
    }

    #[test]
    fn write_file_atomic_sets_world_readable_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker.list");
        write_file_atomic(&path, b"deb x\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert_eq!(fs::read_to_string(&path).unwrap(), "deb x\n");
    }
}
