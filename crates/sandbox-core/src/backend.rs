//! Backend command seam.
//!
//! Every interaction with the management backend goes through a
//! [`CommandExecutor`]: a program name plus an argument vector in, captured
//! output and exit status out. The real implementation spawns processes; tests
//! substitute a mock or an in-memory simulator.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::args::render_command;
use crate::error::{Error, Result};

/// Captured result of a backend command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Exit code, `-1` when the process was killed by a signal
    pub code: i32,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            code,
        }
    }

    /// Check whether the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Convert a non-zero exit into [`Error::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] carrying `command`, the exit code and
    /// the trimmed stderr when the command did not succeed.
    pub fn into_result(self, command: &str) -> Result<String> {
        if self.is_success() {
            Ok(self.stdout)
        } else {
            Err(Error::CommandFailed {
                command: command.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs backend commands.
///
/// Implementations must capture stdout and stderr and report the exit code
/// rather than failing on a non-zero status; only a failure to start the
/// process is an error.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args` to completion.
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs a command and returns its stdout, failing on a non-zero exit.
///
/// # Errors
///
/// Returns [`Error::SpawnFailed`] if the process could not start and
/// [`Error::CommandFailed`] on a non-zero exit.
pub async fn run_checked(
    executor: &dyn CommandExecutor,
    program: &str,
    args: &[String],
) -> Result<String> {
    let line = render_command(program, args);
    tracing::debug!(command = %line, "running backend command");
    executor.execute(program, args).await?.into_result(&line)
}

/// Username and password pair.
///
/// The password is never printed by `Debug` and is only exposed on request.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Login name
    pub username: String,

    /// Password
    pub password: SecretString,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Get the login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_into_result_success() {
        let out = CommandOutput::success("ID: 4\n");
        assert_eq!(out.into_result("oneimage create").unwrap(), "ID: 4\n");
    }

    #[test]
    fn test_into_result_failure() {
        let out = CommandOutput::failure(255, "[one.image.info] Error getting image [9].\n");
        let err = out.into_result("oneimage show 9 --json").unwrap_err();
        assert_eq!(
            err,
            Error::CommandFailed {
                command: "oneimage show 9 --json".to_string(),
                code: 255,
                stderr: "[one.image.info] Error getting image [9].".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_run_checked_with_mock() {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_execute()
            .with(eq("oneuser"), eq(vec!["show".to_string(), "--json".to_string()]))
            .times(1)
            .returning(|_, _| Ok(CommandOutput::success("{}")));

        let stdout = run_checked(
            &executor,
            "oneuser",
            &["show".to_string(), "--json".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(stdout, "{}");
    }

    #[tokio::test]
    async fn test_run_checked_spawn_error() {
        let mut executor = MockCommandExecutor::new();
        executor.expect_execute().returning(|program, _| {
            Err(Error::SpawnFailed {
                command: program.to_string(),
                message: "No such file or directory".to_string(),
            })
        });

        let err = run_checked(&executor, "oneflow", &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "SPAWN_FAILED");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("oneadmin", "s3cret");
        assert_eq!(creds.username(), "oneadmin");
        assert_eq!(creds.password(), "s3cret");
        assert!(!format!("{creds:?}").contains("s3cret"));
    }
}
