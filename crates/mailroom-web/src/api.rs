//! REST API route handlers.
//!
//! Every body is JSON with an `ok` flag. Store errors are mapped to status
//! codes at this boundary by [`ApiError`].

use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mailroom_store::{NewMessage, StatusSnapshot, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::control::{StopWorkerReport, WEB_CHAT_ID, WEB_USER};
use crate::executor::TriggerReport;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A store error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            StoreError::ResourceBusy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::AlreadyIdle => StatusCode::CONFLICT,
            _ => {
                tracing::error!(error = %self.0, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "ok": false, "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Decode an optional JSON body. Blank bodies yield the default; malformed
/// ones become `InvalidArgument` so they share the `{ok, error}` shape.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, StoreError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| StoreError::InvalidArgument(format!("invalid body: {e}")))
}

/// A control operation that ran but did not achieve its effect.
fn control_failure(error: String, key: &str, report: Value) -> Response {
    tracing::warn!(%error, "control action failed");
    let mut body = json!({ "ok": false, "error": error });
    body[key] = report;
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// /api/messages
// ---------------------------------------------------------------------------

/// Return the merged timeline.
pub async fn list_messages(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let messages = state.stores.history.merge().await?;
    Ok(Json(json!({ "ok": true, "messages": messages })))
}

/// Request body for `POST /api/messages`.
#[derive(Debug, Default, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub text: String,
    pub chat_id: Option<i64>,
    pub user: Option<String>,
}

/// Enqueue a message and wake the executor.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body: IncomingMessage = parse_body(&body)?;
    let text = body.text.trim();
    if text.is_empty() {
        return Err(StoreError::InvalidArgument("text is required".into()).into());
    }
    let new = NewMessage::text(text)
        .with_chat(body.chat_id.unwrap_or(WEB_CHAT_ID))
        .with_user(body.user.unwrap_or_else(|| WEB_USER.to_owned()));
    let submitted = state.control.submit(new).await?;
    Ok(Json(json!({
        "ok": true,
        "message": submitted.message,
        "trigger": submitted.trigger,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusBody {
    pub ok: bool,
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

/// Worker record, executor process and pending queue in one snapshot.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    let executor_pid = state.executor.running_pid().await;
    let snapshot =
        StatusSnapshot::collect(&state.stores, executor_pid.is_some(), executor_pid).await;
    Json(StatusBody { ok: true, snapshot })
}

// ---------------------------------------------------------------------------
// GET /api/files/{*path}
// ---------------------------------------------------------------------------

/// Stream an artifact from under the state root.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let resolved = state.stores.layout.resolve_artifact(&path)?;
    let response = match ServeFile::new(resolved).oneshot(request).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    };
    Ok(response.map(Body::new))
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

/// Clear the worker log tail.
pub async fn debug_clear(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.control.clear_log().await?;
    Ok(Json(json!({ "ok": true })))
}

/// Clear the outbox.
pub async fn reset(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.control.reset().await?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// /api/control/*
// ---------------------------------------------------------------------------

pub async fn control_retrigger(State(state): State<Arc<AppState>>) -> Response {
    trigger_response(state.control.retrigger().await)
}

/// 200 when the executor was started or deliberately skipped, 500 when it
/// could not be started.
fn trigger_response(trigger: TriggerReport) -> Response {
    if !trigger.ok {
        let error = trigger
            .error
            .clone()
            .unwrap_or_else(|| "executor could not be started".to_owned());
        return control_failure(error, "trigger", json!(trigger));
    }
    Json(json!({ "ok": true, "trigger": trigger })).into_response()
}

/// Request body for `POST /api/control/test-message`. Every field is
/// optional and the body itself may be empty.
#[derive(Debug, Default, Deserialize)]
pub struct QuickTestMessage {
    pub text: Option<String>,
    pub chat_id: Option<i64>,
    pub user: Option<String>,
}

pub async fn control_test_message(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body: QuickTestMessage = parse_body(&body)?;
    let submitted = state
        .control
        .inject_test_message(body.text, body.chat_id, body.user)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "message": submitted.message,
        "trigger": submitted.trigger,
    })))
}

pub async fn control_stop_worker(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let result = state.control.stop_worker().await?;
    Ok(stop_response(result))
}

/// 500 when the executor outlived both SIGTERM and the hard kill.
fn stop_response(result: StopWorkerReport) -> Response {
    if !result.ok {
        let error = match result.executor.pid {
            Some(pid) => format!("executor {pid} is still running"),
            None => "executor is still running".to_owned(),
        };
        return control_failure(error, "result", json!(result));
    }
    Json(json!({ "ok": true, "result": result })).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::executor::StopReport;

    async fn split(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn stop_report(ok: bool) -> StopWorkerReport {
        StopWorkerReport {
            ok,
            stopped: ok,
            worker_signalled: false,
            pid: Some(4242),
            reason: None,
            executor: StopReport {
                ok,
                stopped: ok,
                pid: Some(4242),
                reason: (!ok).then_some("still_running"),
            },
            worker_reset: None,
        }
    }

    #[tokio::test]
    async fn surviving_executor_is_a_server_error() {
        let (status, body) = split(stop_response(stop_report(false))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "executor 4242 is still running");
        assert_eq!(body["result"]["executor"]["reason"], "still_running");
    }

    #[tokio::test]
    async fn stopped_executor_is_ok() {
        let (status, body) = split(stop_response(stop_report(true))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["result"]["stopped"], true);
    }

    #[tokio::test]
    async fn failed_trigger_carries_its_error() {
        let trigger = TriggerReport {
            ok: false,
            triggered: false,
            pid: None,
            reason: None,
            error: Some("./executor.sh not found".into()),
        };
        let (status, body) = split(trigger_response(trigger)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "./executor.sh not found");
        assert_eq!(body["trigger"]["triggered"], false);
    }

    #[test]
    fn blank_body_uses_defaults() {
        let parsed: QuickTestMessage = parse_body(&Bytes::from_static(b"  \n")).unwrap();
        assert!(parsed.text.is_none());
        let err = parse_body::<IncomingMessage>(&Bytes::from_static(b"{text:")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }
}
