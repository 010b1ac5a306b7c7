//! Workspace provisioning for compile, profile, and debug runs.
//!
//! Every run gets an isolated directory under the configured workspace root
//! holding a Noir package: `Nargo.toml`, `src/main.nr`, and `Prover.toml`.
//! A [`Workspace`] removes its directory exactly once, no matter how many
//! failure paths ask for it.

pub mod writer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Manifest file name.
pub const MANIFEST_FILE: &str = "Nargo.toml";
/// Inputs file name consumed by `nargo` and the debugger.
pub const INPUTS_FILE: &str = "Prover.toml";
/// Source file location relative to the workspace root.
///
/// Breakpoint requests and stack traces both identify the program by this
/// path; only single-file programs are supported.
pub const SOURCE_FILE: &str = "src/main.nr";
/// Package name used when the caller supplies no manifest.
pub const DEFAULT_PACKAGE: &str = "playground";

/// Program text and inputs submitted by a caller.
#[derive(Debug, Clone, Default)]
pub struct ProgramFiles {
    /// Contents of `src/main.nr`.
    pub source: String,
    /// Contents of `Nargo.toml`; a default `bin` manifest when absent.
    pub manifest: Option<String>,
    /// Named inputs rendered into `Prover.toml`.
    pub inputs: BTreeMap<String, Value>,
}

impl ProgramFiles {
    /// Manifest text that will be written to disk.
    #[must_use]
    pub fn manifest_text(&self) -> String {
        self.manifest
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(default_manifest)
    }
}

/// Default manifest for a binary package named [`DEFAULT_PACKAGE`].
#[must_use]
pub fn default_manifest() -> String {
    format!(
        "[package]\nname = \"{DEFAULT_PACKAGE}\"\ntype = \"bin\"\nauthors = [\"\"]\n\n[dependencies]\n"
    )
}

#[derive(Debug, Deserialize)]
struct ManifestPackage {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    package: ManifestPackage,
}

/// Extract `package.name` from manifest text.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` if the manifest is not valid TOML or has
/// no package name.
pub fn package_name(manifest: &str) -> Result<String> {
    let parsed: Manifest = toml::from_str(manifest)
        .map_err(|err| AppError::InvalidInput(format!("invalid manifest: {err}")))?;
    Ok(parsed.package.name)
}

/// Render caller inputs as `Prover.toml` text.
///
/// Numbers are written as strings so that field elements wider than 64 bits
/// survive; arrays and objects map to TOML arrays and tables.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` when an input is `null`.
pub fn render_inputs(inputs: &BTreeMap<String, Value>) -> Result<String> {
    let mut table = toml::Table::new();
    for (name, value) in inputs {
        table.insert(name.clone(), json_to_toml(name, value)?);
    }
    toml::to_string(&table)
        .map_err(|err| AppError::InvalidInput(format!("cannot render inputs: {err}")))
}

fn json_to_toml(name: &str, value: &Value) -> Result<toml::Value> {
    Ok(match value {
        Value::Null => {
            return Err(AppError::InvalidInput(format!("input `{name}` is null")));
        }
        Value::Bool(b) => toml::Value::Boolean(*b),
        Value::Number(n) => toml::Value::String(n.to_string()),
        Value::String(s) => toml::Value::String(s.clone()),
        Value::Array(items) => toml::Value::Array(
            items
                .iter()
                .map(|item| json_to_toml(name, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(fields) => {
            let mut table = toml::Table::new();
            for (key, field) in fields {
                table.insert(key.clone(), json_to_toml(name, field)?);
            }
            toml::Value::Table(table)
        }
    })
}

/// An isolated directory owned by one run or session.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    destroyed: AtomicBool,
}

impl Workspace {
    /// Absolute path of the workspace directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`Workspace::destroy`] has already run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Write the program files into the workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Workspace` on I/O failure or `AppError::InvalidInput`
    /// for an unrenderable input map.
    pub fn write_program(&self, files: &ProgramFiles) -> Result<()> {
        writer::write_workspace_file(&self.path, MANIFEST_FILE, &files.manifest_text())?;
        writer::write_workspace_file(&self.path, SOURCE_FILE, &files.source)?;
        writer::write_workspace_file(&self.path, INPUTS_FILE, &render_inputs(&files.inputs)?)?;
        Ok(())
    }

    /// Remove the directory. Only the first call touches the file system;
    /// later calls return immediately.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "workspace removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to remove workspace");
            }
        }
    }
}

/// Creates per-id workspaces beneath a fixed root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceProvisioner {
    root: PathBuf,
}

impl WorkspaceProvisioner {
    /// Create a provisioner rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory under which workspaces are created.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory for `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Workspace` if `id` is not a plain directory name,
    /// the directory already exists, or it cannot be created.
    pub async fn create(&self, id: &str) -> Result<Workspace> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(AppError::Workspace(format!("invalid workspace id '{id}'")));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| AppError::Workspace(format!("cannot create workspace root: {err}")))?;

        let path = self.root.join(id);
        tokio::fs::create_dir(&path).await.map_err(|err| {
            AppError::Workspace(format!("cannot create workspace {}: {err}", path.display()))
        })?;

        debug!(path = %path.display(), "workspace created");
        Ok(Workspace {
            path,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Create a workspace for `id` and write `files` into it. The directory
    /// is removed again if writing fails.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`WorkspaceProvisioner::create`] and
    /// [`Workspace::write_program`].
    pub async fn provision(&self, id: &str, files: &ProgramFiles) -> Result<Workspace> {
        let workspace = self.create(id).await?;
        if let Err(err) = workspace.write_program(files) {
            workspace.destroy().await;
            return Err(err);
        }
        Ok(workspace)
    }

    /// Remove `workspace`; equivalent to [`Workspace::destroy`].
    pub async fn destroy(&self, workspace: &Workspace) {
        workspace.destroy().await;
    }
}
