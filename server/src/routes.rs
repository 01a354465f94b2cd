//! HTTP route handlers for the SipSync server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /triggers/task-written` - Task write notifications from the document store
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (including the trigger secret)
//! - The completion fan-out handler
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use sipsync_server::config::Config;
//! use sipsync_server::directory::RestDirectory;
//! use sipsync_server::fanout::FanOut;
//! use sipsync_server::push::HttpPushClient;
//! use sipsync_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let timeout = config.request_timeout;
//!     let directory = RestDirectory::new(&config.directory_url, &config.directory_api_key, timeout).unwrap();
//!     let push = HttpPushClient::new(&config.push_url, &config.push_api_key, timeout).unwrap();
//!     let fanout = FanOut::new(Arc::new(directory), Arc::new(push), timeout);
//!     let app = create_router(AppState::new(config, fanout));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sipsync_core::types::TaskWrite;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::auth::{verify_trigger_secret, HEADER_TRIGGER_SECRET};
use crate::config::Config;
use crate::error::ServerError;
use crate::fanout::FanOut;

// ============================================================================
// Constants
// ============================================================================

/// Maximum body size for a trigger notification (64 KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Completion push fan-out.
    pub fanout: Arc<FanOut>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates a new application state.
    #[must_use]
    pub fn new(config: Config, fanout: FanOut) -> Self {
        Self {
            config: Arc::new(config),
            fanout: Arc::new(fanout),
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("fanout", &self.fanout)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Routes:
/// - `POST /triggers/task-written` - Task write trigger
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/triggers/task-written", post(post_task_written))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// POST /triggers/task-written
// ============================================================================

/// Reply to a trigger call.
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// `false` when the fan-out hit a transport failure.
    pub success: bool,
    /// Devices the push service accepted.
    pub sent: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handles one task write notification.
///
/// # Responses
///
/// - `200 OK` - `{success, sent}`, including when the write needed no push or
///   the fan-out could not reach the directory or push service
/// - `400 Bad Request` - Body is not a task write
/// - `401 Unauthorized` - Missing or wrong `X-Trigger-Secret`
/// - `413 Payload Too Large` - Body exceeds 64 KB
async fn post_task_written(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.config.unsafe_no_auth {
        let expected = state.config.trigger_secret.as_deref().unwrap_or_default();
        let presented = headers
            .get(HEADER_TRIGGER_SECRET)
            .and_then(|v| v.to_str().ok());

        if let Err(err) = verify_trigger_secret(presented, expected) {
            warn!(error = %err, "Trigger authentication failed");
            return ServerError::auth(err).into_response();
        }
    }

    let write: TaskWrite = match serde_json::from_slice(&body) {
        Ok(write) => write,
        Err(e) => {
            debug!(error = %e, "Invalid task write body");
            return ServerError::validation(e.to_string()).into_response();
        }
    };

    debug!(
        task_id = %write.task_id,
        user_id = %write.after.user_id,
        completed = write.after.completed,
        "Received task write"
    );

    let report = state.fanout.handle(&write).await;

    Json(TriggerResponse {
        success: report.error.is_none(),
        sent: report.sent,
        error: report.error,
    })
    .into_response()
}

// ============================================================================
// GET /health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status ("ok").
    pub status: String,
    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// No authentication required.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
