//! Request and response bodies and the route handlers.
//!
//! Request fields are `snake_case`; the `camelCase` spelling is accepted
//! as an alias. Every successful response carries `"success": true`.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::AppState;
use crate::dap::protocol::{Breakpoint, SourceBreakpoint};
use crate::debug::{Inspection, StartOutcome, StepOutcome};
use crate::debug::session::SessionSummary;
use crate::toolchain::{self, CompileOutcome, ProfileOutcome};
use crate::workspace::ProgramFiles;
use crate::{AppError, Result};

/// Program submission shared by compile, profile, and debug start.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramRequest {
    /// Contents of `src/main.nr`.
    #[serde(alias = "sourceCode")]
    pub source_code: String,
    /// Contents of `Nargo.toml`.
    #[serde(default, alias = "cargoToml", alias = "nargo_toml", alias = "nargoToml")]
    pub cargo_toml: Option<String>,
    /// Program inputs written to `Prover.toml`.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

impl ProgramRequest {
    fn into_files(self, max_source_bytes: usize) -> Result<ProgramFiles> {
        if self.source_code.trim().is_empty() {
            return Err(AppError::InvalidInput("source_code is empty".into()));
        }
        if self.source_code.len() > max_source_bytes {
            return Err(AppError::InvalidInput(format!(
                "source_code exceeds {max_source_bytes} bytes"
            )));
        }
        Ok(ProgramFiles {
            source: self.source_code,
            manifest: self.cargo_toml,
            inputs: self.inputs,
        })
    }
}

/// Request addressing one session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRequest {
    /// Target session.
    #[serde(alias = "sessionId")]
    pub session_id: String,
}

/// `POST /api/debug/step` body.
#[derive(Debug, Clone, Deserialize)]
pub struct StepRequest {
    /// Target session.
    #[serde(alias = "sessionId")]
    pub session_id: String,
    /// `next`, `into`, `out`, `over`, `continue`, or `step`.
    #[serde(default = "default_step_command")]
    pub command: String,
}

fn default_step_command() -> String {
    "next".into()
}

/// `POST /api/debug/breakpoints` body.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakpointsRequest {
    /// Target session.
    #[serde(alias = "sessionId")]
    pub session_id: String,
    /// Complete breakpoint set; empty clears all breakpoints.
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
    /// Source file; defaults to the program source.
    #[serde(default)]
    pub file: Option<String>,
}

/// Successful response envelope.
#[derive(Debug, Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn ok<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        body,
    })
}

fn session_id(raw: &str) -> Result<&str> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(AppError::InvalidInput("session_id is empty".into()));
    }
    Ok(id)
}

/// Opcode listing body.
#[derive(Debug, Serialize)]
pub struct OpcodesBody {
    opcodes: Vec<Value>,
    message: &'static str,
}

/// Breakpoint listing body.
#[derive(Debug, Serialize)]
pub struct BreakpointsBody {
    breakpoints: Vec<Breakpoint>,
}

/// Session listing body.
#[derive(Debug, Serialize)]
pub struct SessionsBody {
    count: usize,
    sessions: Vec<SessionSummary>,
}

/// Termination body.
#[derive(Debug, Serialize)]
pub struct TerminateBody {
    terminated: bool,
}

/// `POST /api/compile`
pub async fn compile(
    State(state): State<AppState>,
    Json(request): Json<ProgramRequest>,
) -> Result<Json<Success<CompileOutcome>>> {
    let files = request.into_files(state.config.max_source_bytes)?;
    let outcome = toolchain::compile(&state.provisioner, &state.toolchain, &files).await?;
    Ok(ok(outcome))
}

/// `POST /api/profile/opcodes`
pub async fn profile_opcodes(
    State(state): State<AppState>,
    Json(request): Json<ProgramRequest>,
) -> Result<Json<Success<ProfileOutcome>>> {
    let files = request.into_files(state.config.max_source_bytes)?;
    let outcome = toolchain::profile(&state.provisioner, &state.toolchain, &files).await?;
    Ok(ok(outcome))
}

/// `POST /api/debug/start`
pub async fn debug_start(
    State(state): State<AppState>,
    Json(request): Json<ProgramRequest>,
) -> Result<Json<Success<StartOutcome>>> {
    let files = request.into_files(state.config.max_source_bytes)?;
    let outcome = state.debug.start(&files).await?;
    Ok(ok(outcome))
}

/// `POST /api/debug/step`
pub async fn debug_step(
    State(state): State<AppState>,
    Json(request): Json<StepRequest>,
) -> Result<Json<Success<StepOutcome>>> {
    let id = session_id(&request.session_id)?;
    let outcome = state.debug.step(id, request.command.trim()).await?;
    Ok(ok(outcome))
}

/// `POST /api/debug/variables`
pub async fn debug_variables(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<Success<Inspection>>> {
    let id = session_id(&request.session_id)?;
    Ok(ok(state.debug.variables(id).await?))
}

/// `POST /api/debug/witnesses`
pub async fn debug_witnesses(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<Success<Inspection>>> {
    let id = session_id(&request.session_id)?;
    Ok(ok(state.debug.witnesses(id).await?))
}

/// `POST /api/debug/opcodes`
pub async fn debug_opcodes(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<Success<OpcodesBody>>> {
    let id = session_id(&request.session_id)?;
    let opcodes = state.debug.opcodes(id).await?;
    Ok(ok(OpcodesBody {
        opcodes,
        message: "opcode inspection is not supported by the debug adapter",
    }))
}

/// `POST /api/debug/breakpoints`
pub async fn debug_breakpoints(
    State(state): State<AppState>,
    Json(request): Json<BreakpointsRequest>,
) -> Result<Json<Success<BreakpointsBody>>> {
    let id = session_id(&request.session_id)?;
    if let Some(bad) = request.breakpoints.iter().find(|bp| bp.line < 1) {
        return Err(AppError::InvalidInput(format!(
            "breakpoint line must be positive, got {}",
            bad.line
        )));
    }
    let breakpoints = state
        .debug
        .set_breakpoints(id, request.breakpoints, request.file.as_deref())
        .await?;
    Ok(ok(BreakpointsBody { breakpoints }))
}

/// `POST /api/debug/terminate`
pub async fn debug_terminate(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<Success<TerminateBody>>> {
    let id = session_id(&request.session_id)?;
    let terminated = state.debug.terminate(id).await;
    info!(session_id = id, terminated, "terminate requested");
    Ok(Json(Success {
        success: terminated,
        body: TerminateBody { terminated },
    }))
}

/// `GET /api/debug/sessions`
pub async fn debug_sessions(State(state): State<AppState>) -> Json<Success<SessionsBody>> {
    let sessions = state.debug.sessions().await;
    ok(SessionsBody {
        count: sessions.len(),
        sessions,
    })
}
