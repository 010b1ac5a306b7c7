//! Escalating process termination.
//!
//! Termination walks a fixed sequence of steps:
//!
//! ```text
//! Graceful ──▶ Signal ──▶ AwaitExit ──▶ ForceKill ──▶ AwaitKill ──▶ Done
//!     │           │            │                                      ▲
//!     └───────────┴────────────┴──── process already gone ────────────┘
//! ```
//!
//! The graceful step runs a caller-supplied future (normally a `disconnect`
//! request). Its failure or timeout is logged and the walk continues. Waits
//! go through `tokio::time`, so the sequence runs under paused test time.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dap::spawner::ProcessControl;
use crate::Result;

/// Position in the termination sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStep {
    /// Ask the adapter to shut down on its own.
    Graceful,
    /// Deliver a termination signal.
    Signal,
    /// Wait out the grace period for the signal to take effect.
    AwaitExit,
    /// Kill unconditionally.
    ForceKill,
    /// Wait for the kill to be reaped.
    AwaitKill,
    /// Finished.
    Done,
}

/// What the termination sequence did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// The graceful step completed without error.
    pub graceful: bool,
    /// A termination signal was sent.
    pub signalled: bool,
    /// A forced kill was issued.
    pub force_killed: bool,
    /// The process was confirmed dead at the end.
    pub exited: bool,
    /// Steps visited, in order.
    pub steps: Vec<TerminationStep>,
}

/// Run the termination sequence against `process`.
///
/// `graceful` is awaited only while the process is alive. `grace` bounds
/// each wait for the process to go away.
pub async fn terminate_process<F>(
    session_id: &str,
    process: &dyn ProcessControl,
    graceful: F,
    grace: Duration,
) -> TerminationReport
where
    F: Future<Output = Result<()>>,
{
    let mut report = TerminationReport::default();
    let mut graceful = Some(graceful);
    let mut step = TerminationStep::Graceful;

    loop {
        report.steps.push(step);
        step = match step {
            TerminationStep::Graceful => {
                if let (true, Some(fut)) = (process.is_alive(), graceful.take()) {
                    match fut.await {
                        Ok(()) => {
                            report.graceful = true;
                            debug!(session_id, "graceful shutdown acknowledged");
                        }
                        Err(err) => {
                            warn!(session_id, %err, "graceful shutdown failed, escalating");
                        }
                    }
                }
                next_if_alive(process, TerminationStep::Signal)
            }
            TerminationStep::Signal => {
                match process.signal_terminate() {
                    Ok(()) => report.signalled = true,
                    Err(err) => warn!(session_id, %err, "termination signal failed"),
                }
                TerminationStep::AwaitExit
            }
            TerminationStep::AwaitExit => {
                if wait_exit(process, grace).await {
                    TerminationStep::Done
                } else {
                    warn!(session_id, ?grace, "process ignored termination signal, forcing kill");
                    TerminationStep::ForceKill
                }
            }
            TerminationStep::ForceKill => {
                match process.force_kill() {
                    Ok(()) => report.force_killed = true,
                    Err(err) => warn!(session_id, %err, "forced kill failed"),
                }
                TerminationStep::AwaitKill
            }
            TerminationStep::AwaitKill => {
                if !wait_exit(process, grace).await {
                    warn!(session_id, "process still alive after forced kill");
                }
                TerminationStep::Done
            }
            TerminationStep::Done => break,
        };
    }

    report.exited = !process.is_alive();
    info!(
        session_id,
        graceful = report.graceful,
        signalled = report.signalled,
        force_killed = report.force_killed,
        exited = report.exited,
        "process termination finished"
    );
    report
}

fn next_if_alive(process: &dyn ProcessControl, next: TerminationStep) -> TerminationStep {
    if process.is_alive() {
        next
    } else {
        TerminationStep::Done
    }
}

async fn wait_exit(process: &dyn ProcessControl, grace: Duration) -> bool {
    if !process.is_alive() {
        return true;
    }
    tokio::time::timeout(grace, process.wait_exit()).await.is_ok()
}
