//! End-to-end tests for the Mailroom HTTP API.
//!
//! These tests spin up the **real** Axum server on an OS-assigned ephemeral
//! port over a temporary state root and talk to it with `reqwest` and the
//! sync client. Most tests run the executor in external mode so no child
//! process is spawned.

use std::net::SocketAddr;
use std::sync::Arc;

use mailroom_store::{MarkOutcome, Payload, Stores, WorkingState};
use mailroom_sync::{ControlAction, HttpSource, SyncClient};
use mailroom_web::{AppState, ExecutorConfig, RunMode, WebConfig, router};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

// ── helpers ──────────────────────────────────────────────────────────────────

struct TestServer {
    base: String,
    stores: Stores,
    root: TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

/// Bind to 127.0.0.1:0 over a fresh state root and start the full router.
async fn start_test_server() -> TestServer {
    start_server_with(ExecutorConfig {
        run_mode: RunMode::External,
        ..Default::default()
    })
    .await
}

async fn start_server_with(executor: ExecutorConfig) -> TestServer {
    let root = tempfile::tempdir().expect("create temp dir");
    let config = WebConfig {
        root: root.path().to_path_buf(),
        executor: ExecutorConfig {
            workdir: root.path().to_path_buf(),
            ..executor
        },
        ..Default::default()
    };
    let state = Arc::new(AppState::new(config));
    let stores = state.stores.clone();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to port 0");
    let addr: SocketAddr = listener.local_addr().expect("get local addr");
    let base = format!("http://127.0.0.1:{}", addr.port());

    let handle = tokio::spawn(async move {
        axum::serve(listener, router(state)).await.ok();
    });

    // Small yield so the listener is ready.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    TestServer {
        base,
        stores,
        root,
        _handle: handle,
    }
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{base}{path}"))
        .json(&body)
        .send()
        .await
        .expect("request failed");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("invalid JSON"))
}

async fn get(base: &str, path: &str) -> (u16, Value) {
    let resp = reqwest::get(format!("{base}{path}"))
        .await
        .expect("request failed");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("invalid JSON"))
}

// ── /api/messages ────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_pong_round_trip() {
    let server = start_test_server().await;
    let mut client = SyncClient::new(HttpSource::new(&server.base));

    let report = client.send_message("ping").await;
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert_eq!(client.timeline().len(), 1);
    let id = client.timeline()[0].id;
    assert_eq!(client.status().map(|s| s.pending_count), Some(1));

    // Play the worker against the same state root.
    let stores = &server.stores;
    stores.worker.try_begin(id, std::process::id()).await.unwrap();
    stores
        .outbox
        .append(Some(id), Payload::text("pong"), Some(10001))
        .await
        .unwrap();
    assert_eq!(
        stores.queue.mark_processed(id).await.unwrap(),
        MarkOutcome::Marked
    );
    assert!(stores.worker.finish(id).await.unwrap());

    let report = client.poll_once().await;
    assert!(report.timeline_changed);
    let texts: Vec<&str> = client.timeline().iter().map(|i| i.display_text()).collect();
    assert_eq!(texts, ["ping", "pong"]);
    assert_eq!(client.timeline()[0].processed, Some(true));

    let status = client.status().expect("status polled");
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.worker_phase, "idle");
}

#[tokio::test]
async fn posted_message_uses_web_defaults() {
    let server = start_test_server().await;
    let (status, body) = post(&server.base, "/api/messages", json!({"text": "  hi  "})).await;

    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["message"]["text"], "hi");
    assert_eq!(body["message"]["chat_id"], 10001);
    assert_eq!(body["message"]["user"], "Web User");
    assert_eq!(body["trigger"]["triggered"], false);
    assert_eq!(body["trigger"]["reason"], "external_scheduler");
}

#[tokio::test]
async fn malformed_message_body_gets_a_json_error() {
    let server = start_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages", server.base))
        .header("content-type", "application/json")
        .body("{\"text\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().starts_with("invalid body"));
    assert!(server.stores.queue.list().await.is_empty());
}

#[tokio::test]
async fn empty_text_is_rejected() {
    let server = start_test_server().await;
    let (status, body) = post(&server.base, "/api/messages", json!({"text": "   "})).await;

    assert_eq!(status, 400);
    assert_eq!(body["ok"], false);
    assert!(server.stores.queue.list().await.is_empty());
}

// ── /api/files ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn files_are_served_from_the_state_root_only() {
    let server = start_test_server().await;
    let artifacts = server.root.path().join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();
    std::fs::write(artifacts.join("report.txt"), "done").unwrap();

    let resp = reqwest::get(format!("{}/api/files/artifacts/report.txt", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "done");

    let (status, body) = get(&server.base, "/api/files/artifacts/missing.txt").await;
    assert_eq!(status, 404);
    assert_eq!(body["ok"], false);

    // An encoded slash keeps the client from normalizing the dot segment.
    let (status, _) = get(&server.base, "/api/files/..%2Fpasswd").await;
    assert_eq!(status, 403);
}

// ── /api/status and /api/control/* ───────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn stop_worker_clears_a_stale_record() {
    let server = start_test_server().await;
    server
        .stores
        .worker
        .document()
        .save(WorkingState {
            active: true,
            message_id: Some(7),
            pid: Some(999_999_999),
            ..Default::default()
        })
        .await
        .unwrap();

    let (_, status) = get(&server.base, "/api/status").await;
    assert_eq!(status["worker_phase"], "stale");
    assert_eq!(status["stale"]["reason"], "dead_process");

    let (code, body) = post(&server.base, "/api/control/stop-worker", json!({})).await;
    assert_eq!(code, 200);
    assert_eq!(body["result"]["stopped"], true);
    assert_eq!(body["result"]["worker_reset"]["message_id"], 7);
    assert_eq!(body["result"]["worker_signalled"], false);

    let (_, status) = get(&server.base, "/api/status").await;
    assert_eq!(status["worker_phase"], "idle");
    assert_eq!(status["working"]["active"], false);
}

#[tokio::test]
async fn stop_worker_with_nothing_running() {
    let server = start_test_server().await;
    let (code, body) = post(&server.base, "/api/control/stop-worker", json!({})).await;

    assert_eq!(code, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["result"]["stopped"], false);
    assert_eq!(body["result"]["reason"], "not_running");
}

#[tokio::test]
async fn test_message_accepts_an_empty_body() {
    let server = start_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/control/test-message", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"]["text"], "Web control test ping");
    assert_eq!(body["message"]["user"], "Web Control");

    let mut client = SyncClient::new(HttpSource::new(&server.base));
    client
        .control(ControlAction::TestMessage(Some("custom".into())))
        .await;
    assert!(client.feedback().is_some_and(|f| f.is_done()));
    let texts: Vec<&str> = client.timeline().iter().map(|i| i.display_text()).collect();
    assert_eq!(texts, ["Web control test ping", "custom"]);
}

#[tokio::test]
async fn retrigger_reports_external_scheduler() {
    let server = start_test_server().await;
    let (code, body) = post(&server.base, "/api/control/retrigger", json!({})).await;
    assert_eq!(code, 200);
    assert_eq!(body["trigger"]["reason"], "external_scheduler");
    assert!(server.stores.queue.list().await.is_empty());
}

// ── maintenance ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn debug_clear_empties_the_log_tail() {
    let server = start_test_server().await;
    server.stores.worker.append_log(["one", "two"]).await.unwrap();

    let (_, status) = get(&server.base, "/api/status").await;
    assert_eq!(status["log_tail"], json!(["one", "two"]));

    let (code, _) = post(&server.base, "/api/debug/clear", json!({})).await;
    assert_eq!(code, 200);
    let (_, status) = get(&server.base, "/api/status").await;
    assert_eq!(status["log_tail"], json!([]));
}

#[tokio::test]
async fn reset_clears_outbox_but_keeps_history() {
    let server = start_test_server().await;
    server
        .stores
        .outbox
        .append(None, Payload::text("report"), None)
        .await
        .unwrap();
    let (_, before) = get(&server.base, "/api/messages").await;
    assert_eq!(before["messages"].as_array().map(Vec::len), Some(1));

    let (code, _) = post(&server.base, "/api/reset", json!({})).await;
    assert_eq!(code, 200);
    assert!(server.stores.outbox.list().await.is_empty());

    let (_, after) = get(&server.base, "/api/messages").await;
    assert_eq!(after["messages"], before["messages"]);
}

// ── control failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn retrigger_without_a_script_fails() {
    let server = start_server_with(ExecutorConfig::default()).await;

    let (code, body) = post(&server.base, "/api/control/retrigger", json!({})).await;
    assert_eq!(code, 500);
    assert_eq!(body["ok"], false);
    assert_eq!(body["trigger"]["triggered"], false);
    assert!(body["error"].as_str().unwrap().ends_with("executor.sh not found"));

    let mut client = SyncClient::new(HttpSource::new(&server.base));
    client.control(ControlAction::Retrigger).await;
    let feedback = client.feedback().expect("feedback recorded");
    assert!(!feedback.is_done());
    assert!(
        feedback.summary().starts_with("retrigger: Fail"),
        "{}",
        feedback.summary()
    );
    assert!(feedback.summary().contains("executor.sh not found"));
}

#[tokio::test]
async fn message_is_kept_when_the_trigger_fails() {
    let server = start_server_with(ExecutorConfig::default()).await;

    let (code, body) = post(&server.base, "/api/messages", json!({ "text": "build" })).await;
    assert_eq!(code, 200);
    assert_eq!(body["trigger"]["ok"], false);
    assert_eq!(server.stores.queue.pending_ids().await, vec![1]);
}

#[cfg(unix)]
#[tokio::test]
async fn stop_worker_signals_a_live_recorded_worker() {
    let server = start_test_server().await;
    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    server.stores.worker.try_begin(3, child.id()).await.unwrap();

    let (code, body) = post(&server.base, "/api/control/stop-worker", json!({})).await;
    assert_eq!(code, 200);
    assert_eq!(body["result"]["worker_signalled"], true);
    assert_eq!(body["result"]["pid"], child.id());

    let status = child.wait().unwrap();
    assert!(!status.success());
    let (_, status) = get(&server.base, "/api/status").await;
    assert_eq!(status["worker_phase"], "idle");
}
