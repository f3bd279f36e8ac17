/// Plan used when the operator provides none: version control, container
/// runtime, mesh VPN and tunnel clients, plus password logins for sshd.
///
/// `{arch}`, `{codename}` and `{keyring}` in apt source lines are filled in
/// by the package provider on the host.
pub const DEFAULT_PLAN: &str = r#"plan_version = 1

[preconditions]
min_free_mb = 1024
free_space_path = "/"

[[tools]]
name = "git"
binary = "git"
package = "git"

[[tools]]
name = "docker"
binary = "docker"
package = "docker-ce"
group = "docker"

[tools.apt_source]
key_url = "https://download.docker.com/linux/ubuntu/gpg"
repo_line = "deb [arch={arch} signed-by={keyring}] https://download.docker.com/linux/ubuntu {codename} stable"
list_name = "docker"

[[tools]]
name = "tailscale"
binary = "tailscale"
package = "tailscale"

[tools.apt_source]
key_url = "https://pkgs.tailscale.com/stable/ubuntu/{codename}.noarmor.gpg"
repo_line = "deb [signed-by={keyring}] https://pkgs.tailscale.com/stable/ubuntu {codename} main"
list_name = "tailscale"

[[tools]]
name = "cloudflared"
binary = "cloudflared"
package = "cloudflared"

[tools.apt_source]
key_url = "https://pkg.cloudflare.com/cloudflare-main.gpg"
repo_line = "deb [signed-by={keyring}] https://pkg.cloudflare.com/cloudflared {codename} main"
list_name = "cloudflared"

[[services]]
name = "ssh"
unit = "ssh"
primary = "/etc/ssh/sshd_config"
include_dir = "/etc/ssh/sshd_config.d"
include_pattern = "*.conf"
fallback_file = "99-hostprep.conf"
live_check = "ssh-password"

[[directives]]
service = "ssh"
name = "PasswordAuthentication"
value = "yes"
"#;

/// Location searched for an operator plan before falling back to [`DEFAULT_PLAN`].
pub const DEFAULT_PLAN_PATH: &str = "/etc/hostprep/plan.toml";
