use crate::command;
use crate::provider::AccountManager;
use crate::RuntimeError;
use tracing::info;

/// [`AccountManager`] using `id` and `usermod` from shadow-utils.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixAccounts;

impl AccountManager for UnixAccounts {
    fn in_group(&self, user: &str, group: &str) -> Result<bool, RuntimeError> {
        let groups = command::run("id", &["-nG", user], &[])?;
        Ok(group_listed(&groups, group))
    }

    fn add_to_group(&self, user: &str, group: &str) -> Result<(), RuntimeError> {
        info!("adding {user} to group {group}");
        command::run("usermod", &["-aG", group, user], &[])?;
        Ok(())
    }
}

fn group_listed(id_output: &str, group: &str) -> bool {
    id_output.split_whitespace().any(|g| g == group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_listed_matches_whole_names() {
        assert!(group_listed("deploy adm sudo docker", "docker"));
        assert!(!group_listed("deploy adm dockerusers", "docker"));
        assert!(!group_listed("", "docker"));
    }

    #[test]
    fn unknown_user_is_an_error() {
        assert!(UnixAccounts
            .in_group("hostprep-no-such-user-xyz", "docker")
            .is_err());
    }
}
