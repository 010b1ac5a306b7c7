#![forbid(unsafe_code)]

//! `noir-workbench`: HTTP service for compiling, profiling, and debugging
//! Noir programs.
//!
//! Bootstraps configuration, the debug session manager and its reaper, and
//! the HTTP server. On SIGINT/SIGTERM the server stops accepting requests
//! and every live debug session is terminated before exit.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use noir_workbench::config::GlobalConfig;
use noir_workbench::debug::reaper::spawn_reaper;
use noir_workbench::debug::{DebugSessionManager, NargoBackend};
use noir_workbench::http::{self, AppState};
use noir_workbench::toolchain::Toolchain;
use noir_workbench::workspace::WorkspaceProvisioner;
use noir_workbench::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "noir-workbench", about = "Noir compile, profile, and debug server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the directory under which workspaces are created.
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("noir-workbench bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(root) = &args.workspace_root {
        config.workspace_root.clone_from(root);
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = Arc::new(load_config(&args)?);
    info!(
        workspace_root = %config.workspace_root.display(),
        nargo = %config.toolchain.nargo_bin,
        "configuration loaded"
    );

    // ── Build shared application state ──────────────────
    let provisioner = WorkspaceProvisioner::new(config.workspace_root.clone());
    let toolchain = Toolchain::new(config.toolchain.clone());
    let max_sessions = usize::try_from(config.max_concurrent_sessions).unwrap_or(usize::MAX);
    let debug = DebugSessionManager::new(
        provisioner.clone(),
        Arc::new(NargoBackend::new(toolchain.clone())),
        config.debug.clone(),
        max_sessions,
    );

    let state = AppState {
        config: Arc::clone(&config),
        provisioner,
        toolchain,
        debug: Arc::clone(&debug),
    };

    // ── Start background tasks ──────────────────────────
    let ct = CancellationToken::new();
    let reaper_handle = spawn_reaper(
        Arc::clone(&debug),
        config.debug.reap_interval(),
        ct.clone(),
    );
    info!("session reaper started");

    // ── Start HTTP server ───────────────────────────────
    let listener = http::bind(&config).await?;
    let http_ct = ct.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(state, listener, http_ct).await {
            error!(%err, "http server failed");
        }
    });

    info!("noir-workbench ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Terminate live debug sessions ───────────────────
    debug.shutdown().await;

    let _ = tokio::join!(http_handle, reaper_handle);
    info!("noir-workbench shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
