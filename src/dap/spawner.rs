//! Debug adapter process spawner and supervisor.
//!
//! Spawns `nargo dap` for a session with:
//! - the session workspace as working directory,
//! - `kill_on_drop(true)` so a leaked handle never leaves a stray process,
//! - the toolchain environment allowlist,
//! - stderr forwarded to the log line by line (never parsed).
//!
//! The [`Child`] is owned by a supervisor task that publishes the exit status
//! on a watch channel and performs forced kills on request. Callers interact
//! with the process only through [`ProcessControl`].

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dap::client::AdapterWriter;
use crate::toolchain::runner::sanitized_command;
use crate::{AppError, Result};

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when terminated by a signal or unknown.
    pub code: Option<i32>,
    /// Human-readable description.
    pub reason: String,
}

impl ProcessExit {
    fn from_status(status: std::process::ExitStatus) -> Self {
        let code = status.code();
        let reason = code.map_or_else(
            || "process terminated by signal".to_owned(),
            |c| format!("process exited with code {c}"),
        );
        Self { code, reason }
    }
}

/// Boxed future used by [`ProcessControl`].
pub type ExitFuture<'a> = Pin<Box<dyn Future<Output = ProcessExit> + Send + 'a>>;

/// Control surface over an owned child process.
pub trait ProcessControl: Send + Sync {
    /// Exit status once the process has ended.
    fn exit_status(&self) -> Option<ProcessExit>;

    /// Ask the process to terminate (SIGTERM on Unix).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the signal could not be delivered.
    fn signal_terminate(&self) -> Result<()>;

    /// Kill the process unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the kill could not be requested.
    fn force_kill(&self) -> Result<()>;

    /// Resolve when the process has exited.
    fn wait_exit(&self) -> ExitFuture<'_>;

    /// Whether the process is still running.
    fn is_alive(&self) -> bool {
        self.exit_status().is_none()
    }
}

/// Handle on a supervised child process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// Take ownership of `child` and start its supervisor task.
    #[must_use]
    pub fn supervise(session_id: String, mut child: Child) -> Self {
        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let result = tokio::select! {
                result = child.wait() => result,
                Some(()) = kill_rx.recv() => {
                    if let Err(err) = child.start_kill() {
                        warn!(session_id, %err, "failed to kill adapter process");
                    }
                    child.wait().await
                }
            };

            let exit = match result {
                Ok(status) => ProcessExit::from_status(status),
                Err(err) => {
                    warn!(session_id, %err, "error waiting for adapter process");
                    ProcessExit {
                        code: None,
                        reason: format!("wait error: {err}"),
                    }
                }
            };
            info!(session_id, code = ?exit.code, reason = %exit.reason, "adapter process exited");
            let _ = exit_tx.send(Some(exit));
        });

        Self {
            pid,
            exit_rx,
            kill_tx,
        }
    }

    /// OS process id, if it was still known at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl ProcessControl for ProcessHandle {
    fn exit_status(&self) -> Option<ProcessExit> {
        self.exit_rx.borrow().clone()
    }

    #[cfg(unix)]
    fn signal_terminate(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if !self.is_alive() {
            return Ok(());
        }
        let pid = self
            .pid
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| AppError::Io("adapter pid unavailable".into()))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|err| AppError::Io(format!("failed to send SIGTERM: {err}")))
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) -> Result<()> {
        self.force_kill()
    }

    fn force_kill(&self) -> Result<()> {
        // Full means a kill is already queued; closed means the supervisor
        // has already reaped the process.
        let _ = self.kill_tx.try_send(());
        Ok(())
    }

    fn wait_exit(&self) -> ExitFuture<'_> {
        let mut rx = self.exit_rx.clone();
        Box::pin(async move {
            let observed = rx.wait_for(Option::is_some).await.map(|exit| exit.clone());
            match observed {
                Ok(Some(exit)) => exit,
                _ => rx.borrow().clone().unwrap_or_else(unknown_exit),
            }
        })
    }
}

fn unknown_exit() -> ProcessExit {
    ProcessExit {
        code: None,
        reason: "supervisor ended without exit status".into(),
    }
}

/// Streams and control handle of a launched adapter.
pub struct AdapterProcess {
    /// Adapter stdin.
    pub stdin: AdapterWriter,
    /// Adapter stdout.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Process control.
    pub process: std::sync::Arc<dyn ProcessControl>,
}

impl std::fmt::Debug for AdapterProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterProcess")
            .field("alive", &self.process.is_alive())
            .finish_non_exhaustive()
    }
}

/// Spawn `<nargo_bin> dap` in `workspace`.
///
/// # Errors
///
/// Returns `AppError::Dap` if the process cannot be spawned or its stdio
/// cannot be captured.
pub fn spawn_adapter(nargo_bin: &str, session_id: &str, workspace: &Path) -> Result<AdapterProcess> {
    let mut cmd = sanitized_command(nargo_bin, workspace);
    cmd.arg("dap")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Dap(format!("failed to spawn debug adapter: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Dap("failed to capture adapter stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Dap("failed to capture adapter stdout".into()))?;

    if let Some(stderr) = child.stderr.take() {
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => debug!(session_id, line, "adapter stderr"),
                    Ok(None) => break,
                    Err(err) => {
                        debug!(session_id, %err, "adapter stderr read failed");
                        break;
                    }
                }
            }
        });
    }

    info!(
        session_id,
        pid = child.id().unwrap_or(0),
        workspace = %workspace.display(),
        "debug adapter spawned"
    );

    let process = ProcessHandle::supervise(session_id.to_owned(), child);
    Ok(AdapterProcess {
        stdin: Box::new(stdin),
        stdout: Box::new(stdout),
        process: std::sync::Arc::new(process),
    })
}
