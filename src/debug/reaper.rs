//! Background timers: the idle reaper and the completion grace window.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::manager::DebugSessionManager;
use super::session::DebugSession;

/// Spawn the idle reaper.
///
/// Every `interval` it terminates sessions idle past the configured idle
/// timeout, until `cancel` fires.
#[must_use]
pub fn spawn_reaper(
    manager: Arc<DebugSessionManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let reaped = manager.reap_idle().await;
                    if !reaped.is_empty() {
                        info!(count = reaped.len(), "idle sessions reaped");
                    }
                }
            }
        }
    })
}

/// Terminate `session` once it has been quiet for `grace` after completing.
///
/// Any activity restarts the wait. Ends early when the session is already
/// being torn down or `cancel` fires.
pub async fn evict_after_grace(
    manager: Weak<DebugSessionManager>,
    session: Arc<DebugSession>,
    grace: Duration,
    cancel: CancellationToken,
) {
    loop {
        if session.is_terminating() {
            return;
        }
        let now = Instant::now();
        let quiet = session
            .completed_for(now)
            .unwrap_or_default()
            .min(session.idle_for(now));
        if quiet >= grace {
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(grace - quiet) => {}
        }
    }

    debug!(session_id = session.id(), "completion grace elapsed");
    if let Some(manager) = manager.upgrade() {
        manager.terminate(session.id()).await;
    }
}
