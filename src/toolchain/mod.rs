//! Noir toolchain integration: `nargo compile`, `nargo dap`, `noir-profiler`.
//!
//! The compile and profile flows are single-shot: provision a workspace, run
//! the tool, read what it produced, and remove the workspace on every path.

pub mod runner;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::ToolchainConfig;
use crate::workspace::{package_name, ProgramFiles, Workspace, WorkspaceProvisioner};
use crate::{AppError, Result};

use self::runner::{run_command, CommandOutput};

/// Result of a successful `nargo compile`.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Package name from the manifest.
    pub package: String,
    /// Path of the compiled program artifact.
    pub artifact_path: PathBuf,
    /// Compiler warnings and notes.
    pub diagnostics: String,
}

/// Response body of the compile flow.
#[derive(Debug, Clone, Serialize)]
pub struct CompileOutcome {
    /// Compiled program artifact (ABI, bytecode, debug symbols).
    pub artifact: Value,
    /// Compiler warnings and notes.
    pub diagnostics: String,
}

/// Response body of the profile flow.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileOutcome {
    /// Opcode flamegraph as SVG markup.
    pub svg: String,
    /// Profiler standard output.
    pub output: String,
}

/// Handle on the configured toolchain binaries.
#[derive(Debug, Clone)]
pub struct Toolchain {
    config: ToolchainConfig,
}

impl Toolchain {
    /// Create a toolchain handle from configuration.
    #[must_use]
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Configured toolchain settings.
    #[must_use]
    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// `nargo` binary, also used to launch the debug adapter.
    #[must_use]
    pub fn nargo_bin(&self) -> &str {
        &self.config.nargo_bin
    }

    /// Location of the compiled artifact for `package` inside `workspace`.
    #[must_use]
    pub fn artifact_path(workspace: &Path, package: &str) -> PathBuf {
        workspace.join("target").join(format!("{package}.json"))
    }

    /// Run `nargo compile` in `workspace`.
    ///
    /// # Errors
    ///
    /// - `AppError::Build` with the compiler diagnostics on a failed build.
    /// - `AppError::Timeout` / `AppError::Toolchain` when the tool cannot
    ///   run to completion.
    pub async fn build(&self, workspace: &Path, manifest: &str) -> Result<BuildOutput> {
        let package = package_name(manifest)?;
        let output = run_command(
            &self.config.nargo_bin,
            &["compile", "--force"],
            workspace,
            self.config.build_timeout(),
        )
        .await?;

        if !output.success {
            return Err(AppError::Build(output.diagnostics()));
        }

        info!(package, "nargo compile succeeded");
        Ok(BuildOutput {
            artifact_path: Self::artifact_path(workspace, &package),
            package,
            diagnostics: output.diagnostics(),
        })
    }

    /// Run `noir-profiler opcodes` against `artifact`, writing into `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Toolchain` when the profiler exits unsuccessfully.
    pub async fn profile_opcodes(&self, workspace: &Path, artifact: &Path, output_dir: &Path) -> Result<CommandOutput> {
        let artifact = artifact.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        let output = run_command(
            &self.config.profiler_bin,
            &["opcodes", "--artifact-path", &artifact, "--output", &output_dir],
            workspace,
            self.config.profile_timeout(),
        )
        .await?;

        if !output.success {
            return Err(AppError::Toolchain(format!(
                "profiler failed: {}",
                output.diagnostics()
            )));
        }
        Ok(output)
    }
}

/// Compile `files` and return the program artifact.
///
/// # Errors
///
/// Returns provisioning, build, or artifact read failures. The workspace is
/// removed in every case.
pub async fn compile(
    provisioner: &WorkspaceProvisioner,
    toolchain: &Toolchain,
    files: &ProgramFiles,
) -> Result<CompileOutcome> {
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!("compile", run_id);

    async {
        let workspace = provisioner.provision(&run_id, files).await?;
        let result = compile_in(&workspace, toolchain, files).await;
        workspace.destroy().await;
        result
    }
    .instrument(span)
    .await
}

async fn compile_in(workspace: &Workspace, toolchain: &Toolchain, files: &ProgramFiles) -> Result<CompileOutcome> {
    let build = toolchain.build(workspace.path(), &files.manifest_text()).await?;
    let artifact = read_artifact(&build.artifact_path).await?;
    Ok(CompileOutcome {
        artifact,
        diagnostics: build.diagnostics,
    })
}

/// Compile `files`, profile opcode usage, and return the flamegraph SVG.
///
/// # Errors
///
/// Returns provisioning, build, or profiler failures. The workspace is
/// removed in every case.
pub async fn profile(
    provisioner: &WorkspaceProvisioner,
    toolchain: &Toolchain,
    files: &ProgramFiles,
) -> Result<ProfileOutcome> {
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!("profile", run_id);

    async {
        let workspace = provisioner.provision(&run_id, files).await?;
        let result = profile_in(&workspace, toolchain, files).await;
        workspace.destroy().await;
        result
    }
    .instrument(span)
    .await
}

async fn profile_in(workspace: &Workspace, toolchain: &Toolchain, files: &ProgramFiles) -> Result<ProfileOutcome> {
    let build = toolchain.build(workspace.path(), &files.manifest_text()).await?;
    let output_dir = workspace.path().join("profile");
    tokio::fs::create_dir_all(&output_dir).await?;

    let output = toolchain
        .profile_opcodes(workspace.path(), &build.artifact_path, &output_dir)
        .await?;
    let svg = read_first_svg(&output_dir).await?;

    Ok(ProfileOutcome {
        svg,
        output: output.stdout,
    })
}

async fn read_artifact(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read(path).await.map_err(|err| {
        AppError::Toolchain(format!("cannot read artifact {}: {err}", path.display()))
    })?;
    serde_json::from_slice(&raw)
        .map_err(|err| AppError::Toolchain(format!("artifact is not valid json: {err}")))
}

/// Read the first `.svg` file found in `dir`, in file-name order.
async fn read_first_svg(dir: &Path) -> Result<String> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut svgs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "svg") {
            svgs.push(path);
        }
    }
    svgs.sort();

    let first = svgs
        .first()
        .ok_or_else(|| AppError::Toolchain("profiler produced no flamegraph".into()))?;
    Ok(tokio::fs::read_to_string(first).await?)
}
