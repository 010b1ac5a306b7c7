//! Unit tests for workspace provisioning and teardown.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use noir_workbench::workspace::writer::resolve_in_workspace;
use noir_workbench::workspace::{
    package_name, render_inputs, ProgramFiles, WorkspaceProvisioner, INPUTS_FILE, MANIFEST_FILE,
    SOURCE_FILE,
};
use noir_workbench::AppError;

const ADDITION: &str = "fn main(x: Field, y: Field) -> pub Field {\n    x + y\n}\n";

fn program(inputs: &[(&str, Value)]) -> ProgramFiles {
    ProgramFiles {
        source: ADDITION.into(),
        manifest: None,
        inputs: inputs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect(),
    }
}

// ── Provisioning ────────────────────────────────────────────────────────────

/// A provisioned workspace holds the manifest, source, and inputs files.
#[tokio::test]
async fn provision_writes_program_files() {
    let root = tempfile::tempdir().expect("tempdir");
    let provisioner = WorkspaceProvisioner::new(root.path());

    let ws = provisioner
        .provision("run-1", &program(&[("x", json!(5)), ("y", json!("3"))]))
        .await
        .expect("provision");

    assert_eq!(ws.path(), root.path().join("run-1"));
    let manifest = std::fs::read_to_string(ws.path().join(MANIFEST_FILE)).expect("manifest");
    assert!(manifest.contains("type = \"bin\""));
    assert_eq!(package_name(&manifest).expect("name"), "playground");

    let source = std::fs::read_to_string(ws.path().join(SOURCE_FILE)).expect("source");
    assert_eq!(source, ADDITION);

    let inputs = std::fs::read_to_string(ws.path().join(INPUTS_FILE)).expect("inputs");
    assert!(inputs.contains("x = \"5\""), "{inputs}");
    assert!(inputs.contains("y = \"3\""), "{inputs}");
}

/// A caller-supplied manifest is written verbatim.
#[tokio::test]
async fn caller_manifest_is_kept() {
    let root = tempfile::tempdir().expect("tempdir");
    let provisioner = WorkspaceProvisioner::new(root.path());
    let manifest = "[package]\nname = \"adder\"\ntype = \"bin\"\n";
    let files = ProgramFiles {
        manifest: Some(manifest.into()),
        ..program(&[])
    };

    let ws = provisioner.provision("run-2", &files).await.expect("provision");
    let written = std::fs::read_to_string(ws.path().join(MANIFEST_FILE)).expect("manifest");
    assert_eq!(written, manifest);
    assert_eq!(package_name(&written).expect("name"), "adder");
}

/// Ids that are not plain directory names are refused.
#[tokio::test]
async fn invalid_id_is_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let provisioner = WorkspaceProvisioner::new(root.path());

    for id in ["", ".", "..", "a/b", "a\\b"] {
        let err = provisioner.create(id).await.expect_err("must reject");
        assert!(matches!(err, AppError::Workspace(_)), "id {id:?}: {err}");
    }
}

/// Provisioning the same id twice fails instead of sharing a directory.
#[tokio::test]
async fn duplicate_id_is_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let provisioner = WorkspaceProvisioner::new(root.path());

    let _first = provisioner.create("dup").await.expect("first");
    assert!(provisioner.create("dup").await.is_err());
}

/// An unrenderable input removes the half-written workspace again.
#[tokio::test]
async fn failed_write_removes_workspace() {
    let root = tempfile::tempdir().expect("tempdir");
    let provisioner = WorkspaceProvisioner::new(root.path());

    let err = provisioner
        .provision("run-3", &program(&[("x", Value::Null)]))
        .await
        .expect_err("null input");
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert!(!root.path().join("run-3").exists());
}

// ── Teardown ────────────────────────────────────────────────────────────────

/// Destroy removes the directory and tolerates repeated calls.
#[tokio::test]
async fn destroy_is_idempotent() {
    let root = tempfile::tempdir().expect("tempdir");
    let provisioner = WorkspaceProvisioner::new(root.path());
    let ws = provisioner.provision("run-4", &program(&[])).await.expect("provision");

    assert!(!ws.is_destroyed());
    ws.destroy().await;
    assert!(ws.is_destroyed());
    assert!(!ws.path().exists());

    provisioner.destroy(&ws).await;
    ws.destroy().await;
    assert!(!ws.path().exists());
}

// ── Inputs and paths ────────────────────────────────────────────────────────

/// Nested inputs render as TOML arrays and tables with stringified numbers.
#[test]
fn nested_inputs_render_as_toml() {
    let mut inputs = BTreeMap::new();
    inputs.insert("xs".to_owned(), json!([1, 2]));
    inputs.insert("point".to_owned(), json!({ "x": 7, "on_curve": true }));

    let rendered = render_inputs(&inputs).expect("render");
    let parsed: toml::Table = toml::from_str(&rendered).expect("valid toml");

    assert_eq!(parsed["xs"].as_array().map(Vec::len), Some(2));
    assert_eq!(parsed["xs"][0].as_str(), Some("1"));
    assert_eq!(parsed["point"]["x"].as_str(), Some("7"));
    assert_eq!(parsed["point"]["on_curve"].as_bool(), Some(true));
}

/// A manifest without a package name is invalid input.
#[test]
fn manifest_without_package_is_rejected() {
    let err = package_name("[dependencies]\n").expect_err("no package");
    assert!(matches!(err, AppError::InvalidInput(_)));
}

/// Paths climbing out of the workspace are refused.
#[test]
fn escaping_paths_are_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    assert!(resolve_in_workspace(root.path(), "src/../../secret").is_err());
    assert!(resolve_in_workspace(root.path(), "/etc/passwd").is_err());
    assert!(resolve_in_workspace(root.path(), "").is_err());
    let ok = resolve_in_workspace(root.path(), "src/./main.nr").expect("inside");
    assert_eq!(ok, root.path().join("src").join("main.nr"));
}
