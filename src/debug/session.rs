//! Debug session entity.
//!
//! A [`DebugSession`] owns its workspace, its adapter connection, and its
//! adapter process. Mutable bookkeeping (status, activity time, location,
//! cached snapshots, breakpoints) sits behind a short-lived lock that is
//! never held across an await.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dap::client::DapClient;
use crate::dap::protocol::{Breakpoint, StackFrame, Variable};
use crate::dap::spawner::ProcessControl;
use crate::workspace::Workspace;

/// Thread id used until the adapter reports one.
pub const DEFAULT_THREAD_ID: i64 = 1;

/// Lifecycle status of a debug session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Handshake in progress; not yet registered.
    Initializing,
    /// Stopped in the program and accepting commands.
    Active,
    /// Program ran to completion; cached state is still served.
    Completed,
    /// Torn down.
    Terminated,
}

/// A position in the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Source path as reported by the adapter.
    pub file: Option<String>,
    /// 1-based line.
    pub line: i64,
    /// 1-based column.
    pub column: i64,
    /// Enclosing function.
    pub function: String,
}

impl From<&StackFrame> for Location {
    fn from(frame: &StackFrame) -> Self {
        Self {
            file: frame
                .source
                .as_ref()
                .and_then(|s| s.path.clone().or_else(|| s.name.clone())),
            line: frame.line,
            column: frame.column,
            function: frame.name.clone(),
        }
    }
}

impl Location {
    /// Rewrite an absolute `file` under `root` as a `/`-separated path
    /// relative to `root`, the form breakpoints are set with.
    #[must_use]
    pub fn relative_to(mut self, root: &Path) -> Self {
        if let Some(relative) = self
            .file
            .as_deref()
            .and_then(|file| Path::new(file).strip_prefix(root).ok())
        {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            self.file = Some(parts.join("/"));
        }
        self
    }
}

/// Result of a step command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    /// Stop reason reported by the adapter, or `completed`.
    pub reason: String,
    /// Where execution stopped; `None` once the program finished.
    pub location: Option<Location>,
    /// The program has run to completion.
    pub completed: bool,
}

impl StepOutcome {
    /// Reason reported when the program has finished.
    pub const COMPLETED: &'static str = "completed";

    /// Outcome for a finished program.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            reason: Self::COMPLETED.into(),
            location: None,
            completed: true,
        }
    }
}

/// Variables or witnesses returned by an inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    /// Values found.
    pub variables: Vec<Variable>,
    /// Served from the snapshot taken before the program finished.
    pub cached: bool,
    /// Why nothing is available, when empty for a known reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Inspection {
    /// Nothing available, with a reason.
    #[must_use]
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            variables: Vec::new(),
            cached: false,
            message: Some(message.into()),
        }
    }
}

/// Public view of a live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session id.
    pub id: String,
    /// Current status.
    pub status: SessionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Seconds since the last command.
    pub idle_seconds: u64,
    /// Last known location.
    pub location: Option<Location>,
}

struct SessionState {
    status: SessionStatus,
    last_activity: Instant,
    completed_at: Option<Instant>,
    location: Option<Location>,
    thread_id: i64,
    variables: Vec<Variable>,
    witnesses: Vec<Variable>,
    breakpoints: Vec<Breakpoint>,
}

/// One interactive debugging session.
pub struct DebugSession {
    id: String,
    created_at: DateTime<Utc>,
    workspace: Workspace,
    client: DapClient,
    process: Arc<dyn ProcessControl>,
    reader_cancel: CancellationToken,
    terminating: AtomicBool,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("id", &self.id)
            .field("workspace", &self.workspace.path())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    /// Assemble a session in the `Initializing` state.
    #[must_use]
    pub fn new(
        id: String,
        workspace: Workspace,
        client: DapClient,
        process: Arc<dyn ProcessControl>,
        reader_cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            workspace,
            client,
            process,
            reader_cancel,
            terminating: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                status: SessionStatus::Initializing,
                last_activity: Instant::now(),
                completed_at: None,
                location: None,
                thread_id: DEFAULT_THREAD_ID,
                variables: Vec::new(),
                witnesses: Vec::new(),
                breakpoints: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The session's workspace.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Adapter connection.
    #[must_use]
    pub fn client(&self) -> &DapClient {
        &self.client
    }

    /// Adapter process.
    #[must_use]
    pub fn process(&self) -> &Arc<dyn ProcessControl> {
        &self.process
    }

    /// Stop the reader task.
    pub fn stop_reader(&self) {
        self.reader_cancel.cancel();
    }

    /// Claim the right to tear the session down. Only the first caller gets `true`.
    pub fn begin_terminate(&self) -> bool {
        !self.terminating.swap(true, Ordering::SeqCst)
    }

    /// Whether teardown has started.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Whether the program has finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.lock().status == SessionStatus::Completed
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.lock().last_activity = Instant::now();
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lock().last_activity)
    }

    /// Time since completion, if the program has finished.
    #[must_use]
    pub fn completed_for(&self, now: Instant) -> Option<Duration> {
        self.lock()
            .completed_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Handshake finished; the program is paused at `location`.
    pub fn mark_active(&self, location: Option<Location>) {
        let mut state = self.lock();
        if state.status == SessionStatus::Initializing {
            state.status = SessionStatus::Active;
        }
        state.location = location;
    }

    /// The program ran to completion. Returns `true` on the first transition.
    pub fn mark_completed(&self) -> bool {
        let mut state = self.lock();
        match state.status {
            SessionStatus::Completed | SessionStatus::Terminated => false,
            SessionStatus::Initializing | SessionStatus::Active => {
                state.status = SessionStatus::Completed;
                state.completed_at = Some(Instant::now());
                state.location = None;
                true
            }
        }
    }

    /// Teardown finished.
    pub fn mark_terminated(&self) {
        self.lock().status = SessionStatus::Terminated;
    }

    /// Last known location.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        self.lock().location.clone()
    }

    /// Replace the last known location.
    pub fn set_location(&self, location: Option<Location>) {
        self.lock().location = location;
    }

    /// Thread to target with step and stack trace requests.
    #[must_use]
    pub fn thread_id(&self) -> i64 {
        self.lock().thread_id
    }

    /// Remember the thread reported by the latest `stopped` event.
    pub fn set_thread_id(&self, thread_id: i64) {
        self.lock().thread_id = thread_id;
    }

    /// Last variables snapshot.
    #[must_use]
    pub fn cached_variables(&self) -> Vec<Variable> {
        self.lock().variables.clone()
    }

    /// Last witnesses snapshot.
    #[must_use]
    pub fn cached_witnesses(&self) -> Vec<Variable> {
        self.lock().witnesses.clone()
    }

    /// Replace the variables snapshot.
    pub fn cache_variables(&self, variables: Vec<Variable>) {
        self.lock().variables = variables;
    }

    /// Replace the witnesses snapshot.
    pub fn cache_witnesses(&self, witnesses: Vec<Variable>) {
        self.lock().witnesses = witnesses;
    }

    /// Breakpoints as last verified by the adapter.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.lock().breakpoints.clone()
    }

    /// Replace the verified breakpoint set.
    pub fn set_breakpoints(&self, breakpoints: Vec<Breakpoint>) {
        self.lock().breakpoints = breakpoints;
    }

    /// Snapshot for listings.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let now = Instant::now();
        let state = self.lock();
        SessionSummary {
            id: self.id.clone(),
            status: state.status,
            created_at: self.created_at,
            idle_seconds: now.saturating_duration_since(state.last_activity).as_secs(),
            location: state.location.clone(),
        }
    }
}
