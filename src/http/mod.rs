//! HTTP surface: compile, profile, and debug endpoints.
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | `GET`  | `/health` | liveness probe |
//! | `POST` | `/api/compile` | compile flow |
//! | `POST` | `/api/profile/opcodes` | profile flow |
//! | `POST` | `/api/debug/start` | start a session |
//! | `POST` | `/api/debug/step` | step a session |
//! | `POST` | `/api/debug/variables` | inspect variables |
//! | `POST` | `/api/debug/witnesses` | inspect witnesses |
//! | `POST` | `/api/debug/opcodes` | inspect opcodes (always empty) |
//! | `POST` | `/api/debug/breakpoints` | replace breakpoints |
//! | `POST` | `/api/debug/terminate` | terminate a session |
//! | `GET`  | `/api/debug/sessions` | list live sessions |

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::debug::DebugSessionManager;
use crate::toolchain::Toolchain;
use crate::workspace::WorkspaceProvisioner;
use crate::{AppError, Result};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Workspace provisioner for compile and profile runs.
    pub provisioner: WorkspaceProvisioner,
    /// Toolchain for compile and profile runs.
    pub toolchain: Toolchain,
    /// Debug session manager.
    pub debug: Arc<DebugSessionManager>,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Config(_)
            | Self::Io(_)
            | Self::Workspace(_)
            | Self::Build(_)
            | Self::Dap(_)
            | Self::Toolchain(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/compile", post(handlers::compile))
        .route("/api/profile/opcodes", post(handlers::profile_opcodes))
        .route("/api/debug/start", post(handlers::debug_start))
        .route("/api/debug/step", post(handlers::debug_step))
        .route("/api/debug/variables", post(handlers::debug_variables))
        .route("/api/debug/witnesses", post(handlers::debug_witnesses))
        .route("/api/debug/opcodes", post(handlers::debug_opcodes))
        .route("/api/debug/breakpoints", post(handlers::debug_breakpoints))
        .route("/api/debug/terminate", post(handlers::debug_terminate))
        .route("/api/debug/sessions", get(handlers::debug_sessions))
        .with_state(state)
}

/// Bind the configured address.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or cannot be bound.
pub async fn bind(config: &GlobalConfig) -> Result<TcpListener> {
    let bind: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))?;
    TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))
}

/// Serve `state` on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve(state: AppState, listener: TcpListener, ct: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("HTTP server error: {err}")))?;

    info!("HTTP server shut down");
    Ok(())
}
