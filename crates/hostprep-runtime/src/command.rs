use crate::RuntimeError;
use std::process::{Command, Output};
use tracing::debug;

fn describe(program: &str, args: &[&str]) -> String {
    let mut s = program.to_owned();
    for a in args {
        s.push(' ');
        s.push_str(a);
    }
    s
}

/// Run a command to completion and return its output, whatever the exit status.
pub fn output(
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
) -> Result<Output, RuntimeError> {
    let command = describe(program, args);
    debug!("running: {command}");
    Command::new(program)
        .args(args)
        .envs(envs.iter().copied())
        .output()
        .map_err(|source| RuntimeError::Spawn { command, source })
}

/// Run a command and return trimmed stdout; a non-zero exit is an error.
pub fn run(program: &str, args: &[&str], envs: &[(&str, &str)]) -> Result<String, RuntimeError> {
    let out = output(program, args, envs)?;
    if !out.status.success() {
        return Err(RuntimeError::CommandFailed {
            command: describe(program, args),
            status: out.status.to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_trimmed_stdout() {
        assert_eq!(run("echo", &["hello"], &[]).unwrap(), "hello");
    }

    #[test]
    fn run_reports_failure() {
        let err = run("false", &[], &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed { .. }));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run("hostprep-definitely-not-a-binary", &[], &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }

    #[test]
    fn env_is_passed() {
        let out = run(
            "sh",
            &["-c", "echo $HOSTPREP_TEST_VAR"],
            &[("HOSTPREP_TEST_VAR", "42")],
        )
        .unwrap();
        assert_eq!(out, "42");
    }
}
