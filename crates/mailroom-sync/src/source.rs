//! Where a [`SyncClient`](crate::SyncClient) gets its data from.

use std::time::Duration;

use async_trait::async_trait;
use mailroom_store::{StatusSnapshot, TimelineItem, TimelineResponse};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::control::ControlAction;
use crate::error::{SyncError, SyncResult};

/// Read and control access to a Mailroom server.
#[async_trait]
pub trait SyncSource: Send + Sync {
    /// The merged timeline.
    async fn fetch_timeline(&self) -> SyncResult<Vec<TimelineItem>>;

    /// Worker status and log tail.
    async fn fetch_status(&self) -> SyncResult<StatusSnapshot>;

    /// Run a control action and return the server's acknowledgment.
    async fn send_control(&self, action: &ControlAction) -> SyncResult<Value>;

    /// Enqueue a message typed by the viewer.
    async fn post_message(&self, text: &str) -> SyncResult<Value>;
}

/// [`SyncSource`] over the JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base: String,
    http: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("mailroom-sync/0.1")
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, http)
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base = base_url.into().trim_end_matches('/').to_owned();
        Self { base, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let resp = self.http.get(self.url(path)).send().await?;
        decode(resp).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> SyncResult<T> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        decode(resp).await
    }
}

/// Turn a response into `T`, mapping non-2xx into [`SyncError::Rejected`]
/// with the server's `error` message when it sent one.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> SyncResult<T> {
    let status = resp.status();
    let bytes = resp.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        return Err(SyncError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl SyncSource for HttpSource {
    async fn fetch_timeline(&self) -> SyncResult<Vec<TimelineItem>> {
        let body: TimelineResponse = self.get_json("/api/messages").await?;
        Ok(body.messages)
    }

    async fn fetch_status(&self) -> SyncResult<StatusSnapshot> {
        self.get_json("/api/status").await
    }

    async fn send_control(&self, action: &ControlAction) -> SyncResult<Value> {
        debug!(action = action.label(), "sending control action");
        self.post_json(action.path(), &action.body()).await
    }

    async fn post_message(&self, text: &str) -> SyncResult<Value> {
        self.post_json("/api/messages", &json!({ "text": text })).await
    }
}
