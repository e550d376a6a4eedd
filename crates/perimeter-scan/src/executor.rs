//! External tool execution.
//!
//! Every scanner binary (nmap, naabu, nuclei) is invoked through the
//! [`CommandExecutor`] trait so tests can substitute canned output for a
//! real process.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ScanError};

/// Captured output of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit status is returned as output, not as an error;
    /// callers decide what it means for their tool.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// Runs tools as child processes under `tokio::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let start = Instant::now();
        tracing::debug!(program, args = ?args, "Spawning external tool");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => ScanError::ToolUnavailable {
                    tool: program.to_string(),
                },
                _ => ScanError::Io(e),
            })?;

        // Dropping the wait future on timeout or cancellation kills the child.
        let output = tokio::select! {
            out = child.wait_with_output() => out?,
            _ = tokio::time::sleep(timeout) => {
                return Err(ScanError::Timeout {
                    stage: program.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        };

        tracing::debug!(
            program,
            exit_code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            duration_ms = start.elapsed().as_millis(),
            "External tool finished"
        );

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }
}
