//! End-to-end tests of the HTTP surface over a real listener.
//!
//! The server runs on an ephemeral port with the debug manager wired to the
//! scripted adapter; requests go through `reqwest`.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use noir_workbench::debug::{DebugBackend, DebugSessionManager};
use noir_workbench::http::{self, AppState};
use noir_workbench::toolchain::Toolchain;
use noir_workbench::workspace::WorkspaceProvisioner;

use super::test_helpers::{test_config, AdapterScript, FakeBackend, ADDITION_SOURCE};

struct Server {
    base: String,
    client: reqwest::Client,
    ct: CancellationToken,
    _root: TempDir,
}

impl Server {
    async fn start(backend: Arc<FakeBackend>) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let config = test_config(root.path());
        let provisioner = WorkspaceProvisioner::new(config.workspace_root.clone());
        let debug = DebugSessionManager::new(
            provisioner.clone(),
            backend as Arc<dyn DebugBackend>,
            config.debug.clone(),
            4,
        );
        let state = AppState {
            toolchain: Toolchain::new(config.toolchain.clone()),
            config: Arc::new(config),
            provisioner,
            debug,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let ct = CancellationToken::new();
        tokio::spawn(http::serve(state, listener, ct.clone()));

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            ct,
            _root: root,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("json body"))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("json body"))
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

fn addition_request() -> Value {
    json!({
        "sourceCode": ADDITION_SOURCE,
        "inputs": { "x": 5, "y": 3 },
    })
}

// ── Basics ──────────────────────────────────────────────────────────────────

/// `GET /health` answers `ok`.
#[tokio::test]
async fn health_returns_ok() {
    let server = Server::start(FakeBackend::new(AdapterScript::default())).await;
    let body = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    assert_eq!(body, "ok");
}

/// An unknown session maps to 404 with the error envelope.
#[tokio::test]
async fn unknown_session_is_404() {
    let server = Server::start(FakeBackend::new(AdapterScript::default())).await;
    let (status, body) = server
        .post("/api/debug/step", json!({ "session_id": "nope" }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("not found")));
}

/// Empty source is rejected with 400 before anything is provisioned.
#[tokio::test]
async fn empty_source_is_400() {
    let server = Server::start(FakeBackend::new(AdapterScript::default())).await;
    let (status, body) = server
        .post("/api/debug/start", json!({ "source_code": "  " }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
}

/// A build failure surfaces its diagnostics with a server error status.
#[tokio::test]
async fn build_failure_is_reported() {
    let server = Server::start(FakeBackend::failing_build()).await;
    let (status, body) = server.post("/api/debug/start", addition_request()).await;
    assert_eq!(status, 500);
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.starts_with("build:") && e.contains("expected type")));
}

// ── Debug flow ──────────────────────────────────────────────────────────────

/// Start, step, inspect, set breakpoints, list, and terminate over HTTP.
#[tokio::test]
async fn debug_flow_round_trip() {
    let server = Server::start(FakeBackend::new(AdapterScript::default())).await;

    let (status, started) = server.post("/api/debug/start", addition_request()).await;
    assert_eq!(status, 200, "{started}");
    assert_eq!(started["success"], true);
    assert_eq!(started["reason"], "entry");
    assert_eq!(started["location"]["line"], 3);
    assert_eq!(started["location"]["file"], "src/main.nr");
    let id = started["sessionId"].as_str().expect("session id").to_owned();

    let (status, step) = server
        .post("/api/debug/step", json!({ "sessionId": id }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(step["completed"], false);
    assert_eq!(step["location"]["line"], 4);

    let (_, vars) = server
        .post("/api/debug/variables", json!({ "session_id": id }))
        .await;
    let sum = vars["variables"]
        .as_array()
        .and_then(|vs| vs.iter().find(|v| v["name"] == "sum"))
        .expect("sum variable");
    assert_eq!(sum["value"], "8");

    let (_, opcodes) = server
        .post("/api/debug/opcodes", json!({ "session_id": id }))
        .await;
    assert_eq!(opcodes["opcodes"], json!([]));

    let (status, bps) = server
        .post(
            "/api/debug/breakpoints",
            json!({ "session_id": id, "breakpoints": [{ "line": 2 }, { "line": 5 }] }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(bps["breakpoints"][0]["verified"], false);
    assert!(bps["breakpoints"][0]["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert_eq!(bps["breakpoints"][1]["verified"], true);

    let (_, listing) = server.get("/api/debug/sessions").await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["sessions"][0]["id"], id.as_str());
    assert_eq!(listing["sessions"][0]["status"], "active");

    let (status, terminated) = server
        .post("/api/debug/terminate", json!({ "session_id": id }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(terminated["terminated"], true);

    let (_, listing) = server.get("/api/debug/sessions").await;
    assert_eq!(listing["count"], 0);

    let (_, again) = server
        .post("/api/debug/terminate", json!({ "session_id": id }))
        .await;
    assert_eq!(again["success"], false);
    assert_eq!(again["terminated"], false);
}

/// Breakpoint lines must be positive.
#[tokio::test]
async fn non_positive_breakpoint_line_is_400() {
    let server = Server::start(FakeBackend::new(AdapterScript::default())).await;
    let (_, started) = server.post("/api/debug/start", addition_request()).await;
    let id = started["sessionId"].as_str().expect("session id").to_owned();

    let (status, _) = server
        .post(
            "/api/debug/breakpoints",
            json!({ "session_id": id, "breakpoints": [{ "line": 0 }] }),
        )
        .await;
    assert_eq!(status, 400);
}
