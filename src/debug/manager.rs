//! Debug session lifecycle manager.
//!
//! Owns the registry of live sessions and every transition of a session:
//!
//! - **start**: provision workspace, build, spawn `nargo dap`, handshake
//!   (`initialize` → `launch` → `initialized` → `configurationDone` →
//!   first `stopped`), then register. Nothing is registered unless the
//!   handshake completed; every failure path removes the workspace.
//! - **step / inspect / breakpoints**: correlated calls against the running
//!   adapter. Program exit during a step is reported as a normal
//!   `completed` outcome.
//! - **terminate**: graceful `disconnect`, then signal and forced kill,
//!   workspace removal, and registry eviction as the last step.
//!
//! The registry is only touched here; transport code never sees it.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DebugConfig;
use crate::dap::client::{DapClient, TimeoutPolicy};
use crate::dap::inbox::{Inbox, Subscription};
use crate::dap::protocol::{
    event, Breakpoint, Command, Event, EventMessage, InitializeArguments, LaunchArguments, Scope,
    ScopesBody, SetBreakpointsBody, Source, SourceBreakpoint, StackFrame, StackTraceBody, StepKind,
    Variable, VariablesBody,
};
use crate::dap::reader::run_reader;
use crate::dap::spawner::{spawn_adapter, AdapterProcess};
use crate::debug::reaper::evict_after_grace;
use crate::debug::session::{DebugSession, Inspection, Location, SessionSummary, StepOutcome};
use crate::debug::terminator::terminate_process;
use crate::toolchain::{BuildOutput, Toolchain};
use crate::workspace::{ProgramFiles, WorkspaceProvisioner, SOURCE_FILE};
use crate::{AppError, Result};

/// Inputs file name handed to the adapter, without extension.
const PROVER_NAME: &str = "Prover";

/// Events that end a step.
const HALT_EVENTS: &[&str] = &[event::STOPPED, event::TERMINATED, event::EXITED];

/// Boxed future returned by [`DebugBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Build and adapter launch, abstracted so sessions can run against a
/// scripted adapter.
pub trait DebugBackend: Send + Sync {
    /// Compile the program in `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Build` with diagnostics when compilation fails.
    fn build<'a>(&'a self, workspace: &'a Path, manifest: &'a str) -> BackendFuture<'a, BuildOutput>;

    /// Launch a debug adapter with `workspace` as its working directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dap` when the adapter cannot be started.
    fn spawn_adapter<'a>(&'a self, session_id: &'a str, workspace: &'a Path) -> BackendFuture<'a, AdapterProcess>;
}

/// [`DebugBackend`] backed by the installed `nargo`.
#[derive(Debug, Clone)]
pub struct NargoBackend {
    toolchain: Toolchain,
}

impl NargoBackend {
    /// Use `toolchain` for builds and adapter launches.
    #[must_use]
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

impl DebugBackend for NargoBackend {
    fn build<'a>(&'a self, workspace: &'a Path, manifest: &'a str) -> BackendFuture<'a, BuildOutput> {
        Box::pin(self.toolchain.build(workspace, manifest))
    }

    fn spawn_adapter<'a>(&'a self, session_id: &'a str, workspace: &'a Path) -> BackendFuture<'a, AdapterProcess> {
        Box::pin(async move { spawn_adapter(self.toolchain.nargo_bin(), session_id, workspace) })
    }
}

/// Result of a successful start.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    /// New session id.
    pub session_id: String,
    /// Reason of the first stop, usually `entry`.
    pub reason: String,
    /// Initial location.
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Variables,
    Witnesses,
}

impl ScopeKind {
    fn select(self, scopes: Vec<Scope>) -> Option<Scope> {
        match self {
            Self::Variables => scopes.into_iter().next(),
            Self::Witnesses => scopes
                .into_iter()
                .find(|s| s.name.to_lowercase().contains("witness")),
        }
    }

    fn missing(self) -> &'static str {
        match self {
            Self::Variables => "no variable scope available",
            Self::Witnesses => "no witness scope available",
        }
    }

    fn cached(self, session: &DebugSession) -> Vec<Variable> {
        match self {
            Self::Variables => session.cached_variables(),
            Self::Witnesses => session.cached_witnesses(),
        }
    }

    fn cache(self, session: &DebugSession, values: Vec<Variable>) {
        match self {
            Self::Variables => session.cache_variables(values),
            Self::Witnesses => session.cache_witnesses(values),
        }
    }
}

/// Outcome of one hop of an inspection.
enum Probe<T> {
    Found(T),
    Missing(String),
}

struct StartSlot<'a>(&'a AtomicUsize);

impl Drop for StartSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry and lifecycle of debug sessions.
pub struct DebugSessionManager {
    this: Weak<Self>,
    sessions: Mutex<HashMap<String, Arc<DebugSession>>>,
    starting: AtomicUsize,
    provisioner: WorkspaceProvisioner,
    backend: Arc<dyn DebugBackend>,
    config: DebugConfig,
    max_sessions: usize,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DebugSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSessionManager")
            .field("provisioner", &self.provisioner)
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}

impl DebugSessionManager {
    /// Create a manager. At most `max_sessions` sessions exist at once,
    /// counting those still starting.
    #[must_use]
    pub fn new(
        provisioner: WorkspaceProvisioner,
        backend: Arc<dyn DebugBackend>,
        config: DebugConfig,
        max_sessions: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            sessions: Mutex::new(HashMap::new()),
            starting: AtomicUsize::new(0),
            provisioner,
            backend,
            config,
            max_sessions,
            cancel: CancellationToken::new(),
        })
    }

    /// Debug timing configuration.
    #[must_use]
    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Token cancelled by [`DebugSessionManager::shutdown`].
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Summaries of registered sessions.
    pub async fn sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        sessions.iter().map(|s| s.summary()).collect()
    }

    /// Look up a registered session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown ids.
    pub async fn get(&self, session_id: &str) -> Result<Arc<DebugSession>> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("debug session '{session_id}' not found")))
    }

    async fn reserve_slot(&self) -> Result<StartSlot<'_>> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Busy("service is shutting down".into()));
        }
        let sessions = self.sessions.lock().await;
        let in_use = sessions.len() + self.starting.load(Ordering::SeqCst);
        if in_use >= self.max_sessions {
            return Err(AppError::Busy(format!(
                "session limit reached ({} sessions)",
                self.max_sessions
            )));
        }
        self.starting.fetch_add(1, Ordering::SeqCst);
        Ok(StartSlot(&self.starting))
    }

    /// Start a session for `files` and run it to its first stop.
    ///
    /// # Errors
    ///
    /// - `AppError::Busy` when the session limit is reached.
    /// - `AppError::Workspace` / `AppError::InvalidInput` when provisioning fails.
    /// - `AppError::Build` when compilation fails.
    /// - `AppError::Dap` / `AppError::Timeout` when the adapter cannot be
    ///   started or the handshake does not complete.
    pub async fn start(&self, files: &ProgramFiles) -> Result<StartOutcome> {
        let _slot = self.reserve_slot().await?;
        let session_id = Uuid::new_v4().to_string();
        let span = info_span!("debug_start", session_id = %session_id);

        async {
            let workspace = self.provisioner.provision(&session_id, files).await?;

            if let Err(err) = self
                .backend
                .build(workspace.path(), &files.manifest_text())
                .await
            {
                info!(%err, "build failed, session aborted");
                workspace.destroy().await;
                return Err(err);
            }

            let adapter = match self.backend.spawn_adapter(&session_id, workspace.path()).await {
                Ok(adapter) => adapter,
                Err(err) => {
                    workspace.destroy().await;
                    return Err(err);
                }
            };

            let AdapterProcess {
                stdin,
                stdout,
                process,
            } = adapter;
            let inbox = Arc::new(Inbox::new(session_id.clone()));
            let reader_cancel = CancellationToken::new();
            tokio::spawn(run_reader(
                session_id.clone(),
                stdout,
                Arc::clone(&inbox),
                reader_cancel.clone(),
            ));
            let client = DapClient::new(
                session_id.clone(),
                stdin,
                inbox,
                TimeoutPolicy::from(&self.config),
            );
            let session = Arc::new(DebugSession::new(
                session_id.clone(),
                workspace,
                client,
                process,
                reader_cancel,
            ));

            let reason = match self.handshake(&session).await {
                Ok(reason) => reason,
                Err(err) => {
                    warn!(%err, "handshake failed, tearing down");
                    session.begin_terminate();
                    self.teardown(&session).await;
                    return Err(err);
                }
            };

            let location = self.refresh_snapshot(&session).await;
            session.mark_active(location.clone());

            if self.cancel.is_cancelled() {
                session.begin_terminate();
                self.teardown(&session).await;
                return Err(AppError::Busy("service is shutting down".into()));
            }

            self.sessions
                .lock()
                .await
                .insert(session_id.clone(), Arc::clone(&session));
            self.spawn_exit_watcher(&session);

            info!(%reason, line = location.as_ref().map(|l| l.line), "debug session started");
            Ok(StartOutcome {
                session_id: session_id.clone(),
                reason,
                location,
            })
        }
        .instrument(span)
        .await
    }

    /// Run the opening exchange and return the reason of the first stop.
    async fn handshake(&self, session: &DebugSession) -> Result<String> {
        let client = session.client();
        let timeout = Some(self.config.handshake_timeout());

        let response = client
            .call(Command::Initialize(InitializeArguments::default()), timeout)
            .await?;
        if !response.success {
            return Err(AppError::Dap(format!(
                "initialize rejected: {}",
                response.failure_message()
            )));
        }

        let launch = LaunchArguments {
            project_folder: session.workspace().path().to_string_lossy().into_owned(),
            prover_name: PROVER_NAME.into(),
            generate_acir: false,
            skip_instrumentation: false,
        };
        let response = client.call(Command::Launch(launch), timeout).await?;
        if !response.success {
            return Err(AppError::Dap(format!(
                "launch rejected: {}",
                response.failure_message()
            )));
        }

        client
            .wait_for(&[event::INITIALIZED], self.config.handshake_timeout())
            .await?;

        // Not every adapter implements configurationDone.
        match client.call(Command::ConfigurationDone, None).await {
            Ok(r) if r.success => {}
            Ok(r) => debug!(message = %r.failure_message(), "configurationDone not supported"),
            Err(err) => debug!(%err, "configurationDone not acknowledged"),
        }

        let stopped = client
            .wait_for(&[event::STOPPED], self.config.handshake_timeout())
            .await?;
        let Event::Stopped(body) = stopped.kind() else {
            return Err(AppError::Dap(format!("unexpected event `{}`", stopped.event)));
        };
        if let Some(thread_id) = body.thread_id {
            session.set_thread_id(thread_id);
        }
        Ok(if body.reason.is_empty() {
            "entry".into()
        } else {
            body.reason
        })
    }

    fn spawn_exit_watcher(&self, session: &Arc<DebugSession>) {
        let manager = self.this.clone();
        let session = Arc::clone(session);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let exit = tokio::select! {
                () = cancel.cancelled() => return,
                exit = session.process().wait_exit() => exit,
            };
            if session.is_terminating() {
                return;
            }
            debug!(session_id = session.id(), reason = %exit.reason, "adapter exited on its own");
            if let Some(manager) = manager.upgrade() {
                manager.on_completed(&session);
            }
        });
    }

    /// Mark `session` completed and start its grace timer once.
    fn on_completed(&self, session: &Arc<DebugSession>) {
        if !session.mark_completed() {
            return;
        }
        let grace = self.config.completion_grace();
        info!(session_id = session.id(), ?grace, "program finished, retaining session state");
        tokio::spawn(evict_after_grace(
            self.this.clone(),
            Arc::clone(session),
            grace,
            self.cancel.clone(),
        ));
    }

    fn program_finished(session: &DebugSession) -> bool {
        !session.process().is_alive() || session.client().inbox().closed_reason().is_some()
    }

    /// Resolve a failed step or inspection: program exit is a completion,
    /// anything else is the caller's error.
    fn finished_or(&self, session: &Arc<DebugSession>, err: AppError) -> Result<StepOutcome> {
        if Self::program_finished(session) {
            self.on_completed(session);
            Ok(StepOutcome::completed())
        } else {
            Err(err)
        }
    }

    /// Execute a user step command (`next`, `into`, `out`, `over`,
    /// `continue`, `step`) and wait for the program to stop.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidInput` for unknown commands.
    /// - `AppError::NotFound` for unknown sessions.
    /// - `AppError::Dap` / `AppError::Timeout` when the adapter misbehaves
    ///   while still running.
    pub async fn step(&self, session_id: &str, command: &str) -> Result<StepOutcome> {
        let kind = StepKind::from_user_command(command)?;
        let session = self.get(session_id).await?;
        session.touch();

        if session.is_completed() || Self::program_finished(&session) {
            self.on_completed(&session);
            return Ok(StepOutcome::completed());
        }

        let client = session.client();
        // Halt events still buffered belong to an earlier step that timed out.
        let (halted, stale) = client.subscribe_fresh_events(HALT_EVENTS);
        if stale.iter().any(|e| e.event != event::STOPPED) {
            drop(halted);
            self.on_completed(&session);
            return Ok(StepOutcome::completed());
        }

        let step = Command::Step {
            kind,
            thread_id: session.thread_id(),
        };
        let response = match client.call(step, None).await {
            Ok(response) => response,
            Err(err) => return self.finished_or(&session, err),
        };
        if !response.success {
            let err = AppError::Dap(format!(
                "{} rejected: {}",
                kind.command(),
                response.failure_message()
            ));
            return self.finished_or(&session, err);
        }

        let halted = match self.await_halt(&session, halted, response.seq).await {
            Ok(halted) => halted,
            Err(err) => return self.finished_or(&session, err),
        };

        let outcome = match halted.kind() {
            Event::Stopped(body) => {
                if let Some(thread_id) = body.thread_id {
                    session.set_thread_id(thread_id);
                }
                let location = self.refresh_snapshot(&session).await;
                StepOutcome {
                    reason: if body.reason.is_empty() {
                        "step".into()
                    } else {
                        body.reason
                    },
                    location,
                    completed: false,
                }
            }
            _ => {
                self.on_completed(&session);
                StepOutcome::completed()
            }
        };

        session.touch();
        debug!(
            session_id,
            command = kind.command(),
            reason = %outcome.reason,
            line = outcome.location.as_ref().map(|l| l.line),
            "step finished"
        );
        Ok(outcome)
    }

    /// Wait for the halt event caused by the step answered with
    /// `response_seq`. Adapter sequence numbers increase, so a `stopped`
    /// older than the response comes from an earlier step and is skipped.
    /// A stale `terminated` or `exited` still ends the program.
    async fn await_halt<'s>(
        &self,
        session: &'s DebugSession,
        mut halted: Subscription<'s>,
        response_seq: i64,
    ) -> Result<EventMessage> {
        let deadline = Instant::now() + self.config.stopped_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let halt = halted.event(remaining).await?;
            if halt.seq > response_seq || halt.event != event::STOPPED {
                return Ok(halt);
            }
            debug!(
                session_id = session.id(),
                seq = halt.seq,
                response_seq,
                "skipping stopped event from an earlier step"
            );
            halted = session.client().subscribe_events(HALT_EVENTS);
        }
    }

    /// Variables of the innermost frame's first scope.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for unknown sessions, or a transport error
    /// while the program is still running.
    pub async fn variables(&self, session_id: &str) -> Result<Inspection> {
        self.inspect(session_id, ScopeKind::Variables).await
    }

    /// Witness values of the innermost frame.
    ///
    /// # Errors
    ///
    /// As [`DebugSessionManager::variables`].
    pub async fn witnesses(&self, session_id: &str) -> Result<Inspection> {
        self.inspect(session_id, ScopeKind::Witnesses).await
    }

    /// Opcode listing. The adapter offers no such query, so the result is
    /// always empty for a known session.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for unknown sessions.
    pub async fn opcodes(&self, session_id: &str) -> Result<Vec<Value>> {
        let session = self.get(session_id).await?;
        session.touch();
        Ok(Vec::new())
    }

    async fn inspect(&self, session_id: &str, kind: ScopeKind) -> Result<Inspection> {
        let session = self.get(session_id).await?;
        session.touch();

        if session.is_completed() {
            return Ok(Self::cached_inspection(&session, kind));
        }

        let probe = match Self::top_frame(&session).await {
            Ok(Probe::Found(frame)) => Self::frame_values(&session, frame.id, kind).await,
            Ok(Probe::Missing(reason)) => Ok(Probe::Missing(reason)),
            Err(err) => Err(err),
        };

        match probe {
            Ok(Probe::Found(values)) => {
                kind.cache(&session, values.clone());
                Ok(Inspection {
                    variables: values,
                    cached: false,
                    message: None,
                })
            }
            Ok(Probe::Missing(reason)) => Ok(Inspection::empty(reason)),
            Err(_) if Self::program_finished(&session) => {
                self.on_completed(&session);
                Ok(Self::cached_inspection(&session, kind))
            }
            Err(err) => Err(err),
        }
    }

    fn cached_inspection(session: &DebugSession, kind: ScopeKind) -> Inspection {
        Inspection {
            variables: kind.cached(session),
            cached: true,
            message: None,
        }
    }

    async fn top_frame(session: &DebugSession) -> Result<Probe<StackFrame>> {
        let response = session
            .client()
            .call(
                Command::StackTrace {
                    thread_id: session.thread_id(),
                },
                None,
            )
            .await?;
        if !response.success {
            return Ok(Probe::Missing(response.failure_message()));
        }
        let body: StackTraceBody = response.body_as()?;
        Ok(body
            .stack_frames
            .into_iter()
            .next()
            .map_or_else(|| Probe::Missing("no stack frames available".into()), Probe::Found))
    }

    async fn frame_values(session: &DebugSession, frame_id: i64, kind: ScopeKind) -> Result<Probe<Vec<Variable>>> {
        let client = session.client();

        let response = client.call(Command::Scopes { frame_id }, None).await?;
        if !response.success {
            return Ok(Probe::Missing(response.failure_message()));
        }
        let scopes: ScopesBody = response.body_as()?;
        let Some(scope) = kind.select(scopes.scopes) else {
            return Ok(Probe::Missing(kind.missing().into()));
        };

        let response = client
            .call(
                Command::Variables {
                    variables_reference: scope.variables_reference,
                },
                None,
            )
            .await?;
        if !response.success {
            return Ok(Probe::Missing(response.failure_message()));
        }
        let body: VariablesBody = response.body_as()?;
        Ok(Probe::Found(body.variables))
    }

    /// Refresh the location and cache variables and witnesses. Failures
    /// keep the previous snapshot.
    async fn refresh_snapshot(&self, session: &DebugSession) -> Option<Location> {
        let frame = match Self::top_frame(session).await {
            Ok(Probe::Found(frame)) => frame,
            Ok(Probe::Missing(reason)) => {
                debug!(session_id = session.id(), %reason, "no location available");
                session.set_location(None);
                return None;
            }
            Err(err) => {
                debug!(session_id = session.id(), %err, "location refresh failed");
                return session.location();
            }
        };

        let location = Location::from(&frame).relative_to(session.workspace().path());
        session.set_location(Some(location.clone()));

        for kind in [ScopeKind::Variables, ScopeKind::Witnesses] {
            match Self::frame_values(session, frame.id, kind).await {
                Ok(Probe::Found(values)) => kind.cache(session, values),
                Ok(Probe::Missing(reason)) => {
                    debug!(session_id = session.id(), ?kind, %reason, "snapshot skipped");
                }
                Err(err) => debug!(session_id = session.id(), ?kind, %err, "snapshot failed"),
            }
        }
        Some(location)
    }

    /// Replace every breakpoint of the program source.
    ///
    /// `file` may name the source as `src/main.nr` or `main.nr`; it
    /// defaults to the program source. The result has one entry per
    /// requested breakpoint, in request order.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown sessions.
    /// - `AppError::InvalidInput` for any other file.
    /// - `AppError::Dap` / `AppError::Timeout` on transport failure.
    pub async fn set_breakpoints(
        &self,
        session_id: &str,
        breakpoints: Vec<SourceBreakpoint>,
        file: Option<&str>,
    ) -> Result<Vec<Breakpoint>> {
        if let Some(file) = file {
            let file = file.trim_start_matches("./");
            if file != SOURCE_FILE && file != "main.nr" {
                return Err(AppError::InvalidInput(format!(
                    "breakpoints are only supported in {SOURCE_FILE}, not '{file}'"
                )));
            }
        }

        let session = self.get(session_id).await?;
        session.touch();

        if session.is_completed() {
            return Ok(unverified_all(&breakpoints, "program has finished"));
        }

        let command = Command::SetBreakpoints {
            source: Source {
                name: Some("main.nr".into()),
                path: Some(SOURCE_FILE.into()),
            },
            breakpoints: breakpoints.clone(),
        };
        let response = session.client().call(command, None).await?;

        let verified = if response.success {
            let body: SetBreakpointsBody = response.body_as()?;
            reconcile_breakpoints(&breakpoints, body.breakpoints)
        } else {
            unverified_all(&breakpoints, &response.failure_message())
        };

        info!(
            session_id,
            requested = breakpoints.len(),
            verified = verified.iter().filter(|b| b.verified).count(),
            "breakpoints replaced"
        );
        session.set_breakpoints(verified.clone());
        Ok(verified)
    }

    /// Terminate and evict a session. Returns `false` for unknown ids.
    pub async fn terminate(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.lock().await.get(session_id).cloned() else {
            return false;
        };
        if !session.begin_terminate() {
            debug!(session_id, "termination already in progress");
            return true;
        }

        let span = info_span!("debug_terminate", session_id);
        async {
            self.teardown(&session).await;
            self.sessions.lock().await.remove(session_id);
            info!("debug session terminated");
        }
        .instrument(span)
        .await;
        true
    }

    /// Stop the adapter, reader, and workspace of `session`.
    async fn teardown(&self, session: &DebugSession) {
        let client = session.client();
        let disconnect = async {
            let response = client
                .call(
                    Command::Disconnect {
                        terminate_debuggee: true,
                    },
                    None,
                )
                .await?;
            if response.success {
                Ok(())
            } else {
                Err(AppError::Dap(response.failure_message()))
            }
        };

        terminate_process(
            session.id(),
            session.process().as_ref(),
            disconnect,
            self.config.kill_grace(),
        )
        .await;

        session.stop_reader();
        session.workspace().destroy().await;
        session.mark_terminated();
    }

    /// Terminate sessions idle past the idle timeout, and completed
    /// sessions quiet past the completion grace. Returns the reaped ids.
    pub async fn reap_idle(&self) -> Vec<String> {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout();
        let grace = self.config.completion_grace();

        let expired: Vec<String> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| {
                let idle = s.idle_for(now);
                idle >= idle_timeout
                    || s.completed_for(now)
                        .is_some_and(|done| done.min(idle) >= grace)
            })
            .map(|s| s.id().to_owned())
            .collect();

        for session_id in &expired {
            info!(session_id, "reaping idle debug session");
            self.terminate(session_id).await;
        }
        expired
    }

    /// Cancel background timers and terminate every session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        info!(count = ids.len(), "terminating all debug sessions");
        join_all(ids.iter().map(|id| self.terminate(id))).await;
    }
}

fn unverified(requested: &SourceBreakpoint, reason: &str) -> Breakpoint {
    Breakpoint {
        id: None,
        verified: false,
        message: Some(reason.to_owned()),
        line: Some(requested.line),
        column: requested.column,
    }
}

fn unverified_all(requested: &[SourceBreakpoint], reason: &str) -> Vec<Breakpoint> {
    requested.iter().map(|bp| unverified(bp, reason)).collect()
}

/// Pair each requested breakpoint with the adapter's answer. Missing
/// answers and silent rejections get an explanatory message.
fn reconcile_breakpoints(requested: &[SourceBreakpoint], returned: Vec<Breakpoint>) -> Vec<Breakpoint> {
    let mut returned = returned.into_iter();
    requested
        .iter()
        .map(|req| match returned.next() {
            Some(mut bp) => {
                if !bp.verified && bp.message.as_deref().is_none_or(str::is_empty) {
                    bp.message = Some(format!("no executable code at line {}", req.line));
                }
                if bp.line.is_none() {
                    bp.line = Some(req.line);
                }
                bp
            }
            None => unverified(req, "not verified by the debug adapter"),
        })
        .collect()
}
