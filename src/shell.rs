//! Narrow "run a command, capture its text" abstraction.
//!
//! Version checks and the daemon-backed cache backends shell out through
//! this trait so tests can substitute a scripted runner.

use crate::error::{Error, Result};
use std::process::Command;

pub trait Shell: Send + Sync {
    /// Run `command` through `sh -c`, returning combined stdout/stderr with
    /// the trailing newline stripped. A non-zero exit status is an error.
    fn run(&self, command: &str) -> Result<String>;
}

/// The real thing: `/bin/sh -c`.
#[derive(Debug, Default)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn run(&self, command: &str) -> Result<String> {
        tracing::debug!("Running: sh -c {:?}", command);
        let output = Command::new("sh").arg("-c").arg(command).output()?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim_end_matches('\n').to_string();

        if !output.status.success() {
            return Err(Error::probe_failure(
                command,
                format!(
                    "command exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    text
                ),
            ));
        }

        Ok(text)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_and_trims_trailing_newline() {
        let out = SystemShell.run("echo hello").unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn captures_stderr_too() {
        let out = SystemShell.run("echo oops 1>&2").unwrap();
        assert_eq!(out, "oops");
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        assert!(SystemShell.run("exit 3").is_err());
    }
}
