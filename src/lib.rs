#![forbid(unsafe_code)]

//! Compile, profile, and interactively debug Noir programs over HTTP.

pub mod config;
pub mod dap;
pub mod debug;
pub mod errors;
pub mod http;
pub mod toolchain;
pub mod workspace;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
