//! Unit tests for the escalating termination sequence.
//!
//! Runs under paused time against a scripted process, so grace periods
//! elapse instantly and deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use noir_workbench::dap::spawner::{ExitFuture, ProcessControl, ProcessExit};
use noir_workbench::debug::terminator::{terminate_process, TerminationStep};
use noir_workbench::{AppError, Result};

const GRACE: Duration = Duration::from_secs(2);

struct ScriptedProcess {
    exit_tx: watch::Sender<Option<ProcessExit>>,
    ignores_sigterm: bool,
    signals: AtomicUsize,
    kills: AtomicUsize,
}

impl ScriptedProcess {
    fn new(ignores_sigterm: bool) -> Self {
        Self {
            exit_tx: watch::Sender::new(None),
            ignores_sigterm,
            signals: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        }
    }

    fn exit(&self, reason: &str) {
        self.exit_tx.send_if_modified(|status| {
            if status.is_some() {
                return false;
            }
            *status = Some(ProcessExit {
                code: None,
                reason: reason.into(),
            });
            true
        });
    }
}

impl ProcessControl for ScriptedProcess {
    fn exit_status(&self) -> Option<ProcessExit> {
        self.exit_tx.borrow().clone()
    }

    fn signal_terminate(&self) -> Result<()> {
        self.signals.fetch_add(1, Ordering::SeqCst);
        if !self.ignores_sigterm {
            self.exit("sigterm");
        }
        Ok(())
    }

    fn force_kill(&self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.exit("killed");
        Ok(())
    }

    fn wait_exit(&self) -> ExitFuture<'_> {
        let mut rx = self.exit_tx.subscribe();
        Box::pin(async move {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|status| status.clone())
                .unwrap_or(ProcessExit {
                    code: None,
                    reason: "unknown".into(),
                })
        })
    }
}

// ── Graceful paths ──────────────────────────────────────────────────────────

/// A successful disconnect that ends the process needs no signals.
#[tokio::test(start_paused = true)]
async fn graceful_disconnect_needs_no_signal() {
    let process = ScriptedProcess::new(false);
    let report = terminate_process(
        "s",
        &process,
        async {
            process.exit("disconnected");
            Ok::<(), AppError>(())
        },
        GRACE,
    )
    .await;

    assert!(report.graceful);
    assert!(!report.signalled);
    assert!(!report.force_killed);
    assert!(report.exited);
    assert_eq!(report.steps, vec![TerminationStep::Graceful, TerminationStep::Done]);
}

/// An already dead process skips the disconnect and every signal.
#[tokio::test(start_paused = true)]
async fn dead_process_is_left_alone() {
    let process = ScriptedProcess::new(false);
    process.exit("crashed");

    let attempted = AtomicBool::new(false);
    let report = terminate_process(
        "s",
        &process,
        async {
            attempted.store(true, Ordering::SeqCst);
            Ok::<(), AppError>(())
        },
        GRACE,
    )
    .await;

    assert!(!attempted.load(Ordering::SeqCst), "disconnect must not be attempted");
    assert!(!report.graceful);
    assert_eq!(process.signals.load(Ordering::SeqCst), 0);
    assert_eq!(process.kills.load(Ordering::SeqCst), 0);
    assert!(report.exited);
}

// ── Escalation ──────────────────────────────────────────────────────────────

/// A failed disconnect escalates to a termination signal, which suffices.
#[tokio::test(start_paused = true)]
async fn failed_disconnect_escalates_to_signal() {
    let process = ScriptedProcess::new(false);
    let report = terminate_process(
        "s",
        &process,
        async { Err::<(), _>(AppError::Timeout("disconnect".into())) },
        GRACE,
    )
    .await;

    assert!(!report.graceful);
    assert!(report.signalled);
    assert!(!report.force_killed);
    assert!(report.exited);
    assert_eq!(
        report.steps,
        vec![
            TerminationStep::Graceful,
            TerminationStep::Signal,
            TerminationStep::AwaitExit,
            TerminationStep::Done,
        ]
    );
}

/// A process ignoring the signal is force-killed after the grace period.
#[tokio::test(start_paused = true)]
async fn ignored_signal_escalates_to_kill() {
    let process = ScriptedProcess::new(true);
    let started = tokio::time::Instant::now();

    let report = terminate_process(
        "s",
        &process,
        async { Err::<(), _>(AppError::Dap("send failed".into())) },
        GRACE,
    )
    .await;

    assert!(report.signalled);
    assert!(report.force_killed);
    assert!(report.exited);
    assert_eq!(process.signals.load(Ordering::SeqCst), 1);
    assert_eq!(process.kills.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() >= GRACE, "kill must wait out the grace period");
    assert_eq!(report.steps.last(), Some(&TerminationStep::Done));
    assert!(report.steps.contains(&TerminationStep::ForceKill));
}

/// A disconnect that succeeds but leaves the process running still escalates.
#[tokio::test(start_paused = true)]
async fn acknowledged_disconnect_with_live_process_escalates() {
    let process = ScriptedProcess::new(false);
    let report = terminate_process("s", &process, async { Ok::<(), AppError>(()) }, GRACE).await;

    assert!(report.graceful);
    assert!(report.signalled);
    assert!(report.exited);
}
