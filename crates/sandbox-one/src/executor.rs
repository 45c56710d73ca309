//! Process-backed command executor.

use std::process::Stdio;

use async_trait::async_trait;
use sandbox_core::args::render_command;
use sandbox_core::backend::{CommandExecutor, CommandOutput};
use sandbox_core::Error;
use tokio::process::Command;

use crate::Result;

#[cfg(unix)]
const SIGINT: i32 = 2;

/// Runs backend commands as child processes of the installer.
///
/// Standard input is closed so a tool that unexpectedly asks a question fails
/// instead of hanging the installer. On Unix each child leads its own process
/// group, so a terminal Ctrl-C reaches the installer only; the child is
/// killed when the installer drops the pending command.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    env: Vec<(String, String)>,
}

impl ProcessExecutor {
    /// Create an executor inheriting the installer's environment.
    #[must_use]
    pub const fn new() -> Self {
        Self { env: Vec::new() }
    }

    /// Set an extra environment variable for every spawned command.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let output = command.output().await.map_err(|e| Error::SpawnFailed {
            command: render_command(program, args),
            message: e.to_string(),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if output.status.signal() == Some(SIGINT) {
                return Err(Error::Interrupted);
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code().unwrap_or(-1),
        })
    }
}
