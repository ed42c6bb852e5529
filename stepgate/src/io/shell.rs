//! Shell executor abstraction for command gates.
//!
//! The [`ShellExecutor`] trait decouples gate evaluation from the host
//! process boundary. Tests use scripted executors that return predetermined
//! outcomes without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Parameters for one shell command.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    pub command: String,
    /// Working directory; the caller's current directory when `None`.
    pub cwd: Option<PathBuf>,
    /// Added on top of a copy of the process environment.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ShellRequest {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: Vec::new(),
            timeout,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutcome {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
    pub timed_out: bool,
}

impl ShellOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Abstraction over command execution backends.
pub trait ShellExecutor: Send + Sync {
    /// Run `request.command`; errors mean the command could not be run at all.
    fn run(&self, request: &ShellRequest) -> Result<ShellOutcome>;
}

/// Runs commands through the host interpreter (`sh -c` / `cmd /C`).
#[derive(Debug, Clone, Copy, Default)]
pub struct HostShell;

impl ShellExecutor for HostShell {
    #[instrument(skip_all, fields(command = %request.command, timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &ShellRequest) -> Result<ShellOutcome> {
        let mut cmd = interpreter(&request.command);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run shell command `{}`", request.command))?;

        let mut merged = output.merged();
        merged.push_str(&output.truncated_notice());
        if output.timed_out {
            warn!("shell command timed out");
            return Ok(ShellOutcome {
                exit_code: None,
                output: merged,
                timed_out: true,
            });
        }

        debug!(exit_code = ?output.status.code(), "shell command finished");
        Ok(ShellOutcome {
            exit_code: output.status.code(),
            output: merged,
            timed_out: false,
        })
    }
}

#[cfg(windows)]
fn interpreter(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn interpreter(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}
