//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// External toolchain binaries and their time limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolchainConfig {
    /// `nargo` binary used for `compile` and `dap`.
    #[serde(default = "default_nargo_bin")]
    pub nargo_bin: String,
    /// `noir-profiler` binary used for opcode flamegraphs.
    #[serde(default = "default_profiler_bin")]
    pub profiler_bin: String,
    /// Upper bound for a single `nargo compile` run.
    #[serde(default = "default_build_timeout_seconds")]
    pub build_timeout_seconds: u64,
    /// Upper bound for a single profiler run.
    #[serde(default = "default_profile_timeout_seconds")]
    pub profile_timeout_seconds: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            nargo_bin: default_nargo_bin(),
            profiler_bin: default_profiler_bin(),
            build_timeout_seconds: default_build_timeout_seconds(),
            profile_timeout_seconds: default_profile_timeout_seconds(),
        }
    }
}

impl ToolchainConfig {
    /// Build timeout as a [`Duration`].
    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_seconds)
    }

    /// Profiler timeout as a [`Duration`].
    #[must_use]
    pub fn profile_timeout(&self) -> Duration {
        Duration::from_secs(self.profile_timeout_seconds)
    }
}

fn default_nargo_bin() -> String {
    "nargo".into()
}

fn default_profiler_bin() -> String {
    "noir-profiler".into()
}

fn default_build_timeout_seconds() -> u64 {
    60
}

fn default_profile_timeout_seconds() -> u64 {
    120
}

/// Debug session timing: correlation timeouts, reaping, and kill escalation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DebugConfig {
    /// Default timeout for a correlated request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for `disconnect`, longer to allow an orderly shutdown.
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,
    /// Timeout for each handshake step.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Timeout for the `stopped` event after a step command.
    #[serde(default = "default_stopped_timeout_ms")]
    pub stopped_timeout_ms: u64,
    /// Idle duration after which a session is reaped.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// Interval between reaper sweeps.
    #[serde(default = "default_reap_interval_seconds")]
    pub reap_interval_seconds: u64,
    /// How long a completed session stays queryable without further activity.
    #[serde(default = "default_completion_grace_seconds")]
    pub completion_grace_seconds: u64,
    /// Wait between the termination signal and the forced kill.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            stopped_timeout_ms: default_stopped_timeout_ms(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            reap_interval_seconds: default_reap_interval_seconds(),
            completion_grace_seconds: default_completion_grace_seconds(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

impl DebugConfig {
    /// Default per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Timeout applied to `disconnect`.
    #[must_use]
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Timeout applied to handshake steps.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Timeout for a `stopped` event after stepping.
    #[must_use]
    pub fn stopped_timeout(&self) -> Duration {
        Duration::from_millis(self.stopped_timeout_ms)
    }

    /// Idle threshold for the reaper.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Reaper sweep interval.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }

    /// Grace window for completed sessions.
    #[must_use]
    pub fn completion_grace(&self) -> Duration {
        Duration::from_secs(self.completion_grace_seconds)
    }

    /// Grace period before escalating to a forced kill.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_disconnect_timeout_ms() -> u64 {
    15_000
}

fn default_handshake_timeout_ms() -> u64 {
    30_000
}

fn default_stopped_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_seconds() -> u64 {
    900
}

fn default_reap_interval_seconds() -> u64 {
    60
}

fn default_completion_grace_seconds() -> u64 {
    30
}

fn default_kill_grace_ms() -> u64 {
    2_000
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    4000
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("noir-workbench")
}

fn default_max_concurrent_sessions() -> u32 {
    16
}

fn default_max_source_bytes() -> usize {
    256 * 1024
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// HTTP listener port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Parent directory for per-request and per-session workspaces.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Maximum live debug sessions.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Maximum accepted size of a submitted source file.
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    /// External toolchain settings.
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    /// Debug session timing.
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            workspace_root: default_workspace_root(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            max_source_bytes: default_max_source_bytes(),
            toolchain: ToolchainConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate limits and canonicalize the workspace root, creating it if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on a zero limit or an unusable root.
    pub fn validate(&mut self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be greater than zero".into(),
            ));
        }

        if self.max_source_bytes == 0 {
            return Err(AppError::Config(
                "max_source_bytes must be greater than zero".into(),
            ));
        }

        let timings = [
            ("toolchain.build_timeout_seconds", self.toolchain.build_timeout_seconds),
            ("toolchain.profile_timeout_seconds", self.toolchain.profile_timeout_seconds),
            ("debug.request_timeout_ms", self.debug.request_timeout_ms),
            ("debug.disconnect_timeout_ms", self.debug.disconnect_timeout_ms),
            ("debug.handshake_timeout_ms", self.debug.handshake_timeout_ms),
            ("debug.stopped_timeout_ms", self.debug.stopped_timeout_ms),
            ("debug.idle_timeout_seconds", self.debug.idle_timeout_seconds),
            ("debug.reap_interval_seconds", self.debug.reap_interval_seconds),
        ];
        if let Some((name, _)) = timings.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{name} must be greater than zero")));
        }

        fs::create_dir_all(&self.workspace_root)
            .map_err(|err| AppError::Config(format!("workspace_root unusable: {err}")))?;
        self.workspace_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;

        Ok(())
    }
}
