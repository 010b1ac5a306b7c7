//! Atomic file writing inside a workspace.
//!
//! Validates the target path against the workspace root, creates parent
//! directories as needed, and writes content atomically via
//! `tempfile::NamedTempFile::persist()` so the toolchain never observes a
//! partially written file.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Validate that `candidate` resides within `workspace_root`.
///
/// Rejects absolute paths and `..` segments that climb above the root.
/// Returns the joined absolute path on success.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` if the path escapes the workspace.
pub fn resolve_in_workspace(workspace_root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in candidate.as_ref().components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::InvalidInput(
                        "path attempts to escape workspace".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::InvalidInput(
                    "path must be relative to the workspace".into(),
                ));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(AppError::InvalidInput("path must not be empty".into()));
    }

    Ok(workspace_root.join(normalized))
}

/// Write `content` to `relative` under `workspace_root`.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` if the path escapes the workspace and
/// `AppError::Workspace` on I/O failures.
pub fn write_workspace_file(workspace_root: &Path, relative: &str, content: &str) -> Result<PathBuf> {
    let target = resolve_in_workspace(workspace_root, relative)?;

    let parent = target
        .parent()
        .ok_or_else(|| AppError::Workspace("file path has no parent directory".into()))?;
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Workspace(format!(
            "failed to create parent directories for {}: {err}",
            target.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Workspace(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(content.as_bytes())
        .map_err(|err| AppError::Workspace(format!("failed to write temporary file: {err}")))?;
    tmp.persist(&target).map_err(|err| {
        AppError::Workspace(format!(
            "failed to persist file to {}: {err}",
            target.display()
        ))
    })?;

    Ok(target)
}
