//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Session workspace could not be provisioned or removed.
    Workspace(String),
    /// The build tool rejected the program; carries its diagnostics.
    Build(String),
    /// Debug adapter protocol failure (framing, process death, bad shape).
    Dap(String),
    /// A correlated response or awaited event did not arrive in time.
    Timeout(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller supplied input that failed validation.
    InvalidInput(String),
    /// An external toolchain command could not be run or failed.
    Toolchain(String),
    /// A capacity limit was reached.
    Busy(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Workspace(msg) => write!(f, "workspace: {msg}"),
            Self::Build(msg) => write!(f, "build: {msg}"),
            Self::Dap(msg) => write!(f, "dap: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Toolchain(msg) => write!(f, "toolchain: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
