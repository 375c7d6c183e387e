//! Running commands through the shell.

use crate::error::Error;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq)]
/// What a finished command left behind
pub struct ShellOutput {
    /// Exit status; -1 when the process was killed by a signal
    pub status: i32,
    /// Captured standard output, empty unless capture was requested
    pub stdout: String,
}

#[derive(Debug, Clone)]
/// A command line ready to be handed to the shell
pub struct ShellCommand<'a> {
    shell: &'a str,
    flags: &'a str,
    env: Vec<(String, String)>,
    capture: bool,
}

impl<'a> ShellCommand<'a> {
    /// Use `shell` with `flags` (split on whitespace) before the command.
    pub fn new(shell: &'a str, flags: &'a str) -> Self {
        ShellCommand {
            shell,
            flags,
            env: Vec::new(),
            capture: false,
        }
    }

    /// Run with exactly these environment variables.
    ///
    /// `SHELL` is taken from the process environment, since it is never
    /// imported as a variable.
    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Collect standard output instead of passing it through.
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// Run `command` and wait for it.
    pub fn run(&self, command: &str) -> Result<ShellOutput, Error> {
        log::debug!("{} {} {:?}", self.shell, self.flags, command);
        let mut cmd = Command::new(self.shell);
        cmd.args(self.flags.split_whitespace())
            .arg(command)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Ok(shell) = std::env::var("SHELL") {
            cmd.env("SHELL", shell);
        }

        if !self.capture {
            let status = cmd.status()?;
            return Ok(ShellOutput {
                status: status.code().unwrap_or(-1),
                stdout: String::new(),
            });
        }

        let output = cmd.stdin(Stdio::inherit()).stderr(Stdio::inherit()).output()?;
        let status = output.status.code().unwrap_or(-1);
        log::trace!("exit status {}", status);
        Ok(ShellOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Turn the output of `$(shell)` or `!=` into a variable value: trailing
/// newlines are dropped and the rest become spaces.
pub fn fold_newlines(output: &str) -> String {
    output
        .replace("\r\n", "\n")
        .trim_end_matches('\n')
        .replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_newlines() {
        assert_eq!(fold_newlines("a\nb\n\n"), "a b");
        assert_eq!(fold_newlines("a\r\nb\r\n"), "a b");
        assert_eq!(fold_newlines(""), "");
        assert_eq!(fold_newlines("  x  \n"), "  x  ");
    }

    #[test]
    fn test_run_captured() {
        let output = ShellCommand::new("/bin/sh", "-c")
            .capture(true)
            .run("echo hello; echo world")
            .unwrap();
        assert_eq!(output.status, 0);
        assert_eq!(output.stdout, "hello\nworld\n");
    }

    #[test]
    fn test_run_status() {
        let output = ShellCommand::new("/bin/sh", "-c").run("exit 3").unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout, "");
    }

    #[test]
    fn test_run_env() {
        let output = ShellCommand::new("/bin/sh", "-c")
            .env(vec![("GREETING".to_string(), "hi".to_string())])
            .capture(true)
            .run("echo $GREETING")
            .unwrap();
        assert_eq!(output.stdout, "hi\n");
    }

    #[test]
    fn test_missing_shell() {
        let err = ShellCommand::new("/nonexistent/shell", "-c").run("true").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
