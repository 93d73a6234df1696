//! Router composition and server startup.

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::WebConfig;
use crate::api;
use crate::state::AppState;

/// Build the router with every route registered.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/messages", get(api::list_messages).post(api::post_message))
        .route("/api/status", get(api::status))
        .route("/api/files/{*path}", get(api::get_file))
        .route("/api/debug/clear", post(api::debug_clear))
        .route("/api/reset", post(api::reset))
        .route("/api/control/retrigger", post(api::control_retrigger))
        .route("/api/control/test-message", post(api::control_test_message))
        .route("/api/control/stop-worker", post(api::control_stop_worker))
        .layer(cors)
        .with_state(state)
}

/// The Mailroom HTTP server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: WebConfig) -> Self {
        let state = Arc::new(AppState::new(config.clone()));
        Self { config, state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Start the server and block until Ctrl-C.
    ///
    /// Pending work left over from a previous run is picked up by triggering
    /// the executor once at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> std::io::Result<()> {
        let addr = self.addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            addr = %addr,
            root = %self.config.root.display(),
            run_mode = self.config.executor.run_mode.as_str(),
            "starting web server"
        );

        if !self.state.stores.queue.pending_ids().await.is_empty() {
            let trigger = self.state.control.retrigger().await;
            tracing::info!(?trigger, "pending messages found at startup");
        }

        let state = Arc::clone(&self.state);
        axum::serve(listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
                let stopped = state.executor.stop().await;
                tracing::info!(?stopped, "executor stopped");
            })
            .await
    }
}
