//! External command runner with a bounded wall-clock timeout.
//!
//! Commands are launched with:
//! - `kill_on_drop(true)` so a timed-out child does not outlive its caller.
//! - `env_clear()` + a safe variable allowlist so server secrets never reach
//!   the toolchain.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Environment variables inherited by spawned toolchain processes.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "NARGO_HOME",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "APPDATA",
    "LOCALAPPDATA",
];

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, absent when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Standard error and standard output joined, for diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{stderr}\n{stdout}"),
            (false, true) => stderr.to_owned(),
            (true, _) => stdout.to_owned(),
        }
    }
}

/// Build a [`Command`] with the environment allowlist applied.
#[must_use]
pub fn sanitized_command(program: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.current_dir(cwd);
    cmd
}

/// Run `program args…` in `cwd`, capturing output, killing it after `timeout`.
///
/// # Errors
///
/// - `AppError::Toolchain("failed to spawn …")` when the binary cannot start.
/// - `AppError::Timeout` when the process outlives `timeout`.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut cmd = sanitized_command(program, cwd);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Toolchain(format!("failed to spawn {program}: {err}")))?;

    debug!(program, ?args, cwd = %cwd.display(), "toolchain command started");

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(AppError::Toolchain(format!(
                "failed to collect output of {program}: {err}"
            )));
        }
        Err(_elapsed) => {
            // The future owning the child was dropped, which kills it.
            warn!(program, ?timeout, "toolchain command timed out");
            return Err(AppError::Timeout(format!(
                "{program} did not finish within {timeout:?}"
            )));
        }
    };

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
