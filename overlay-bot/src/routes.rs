//! HTTP health endpoints.
//!
//! - `GET /health` reports whether the update polling loop is alive.
//! - `GET /ready` additionally requires a reachable session store.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::session::SessionStore;

// ============================================================================
// State
// ============================================================================

/// Shared state for the health server.
pub struct HealthState {
    /// Set while the polling task runs.
    pub bot_alive: Arc<AtomicBool>,
    /// Store probed by `/ready`.
    pub store: Arc<dyn SessionStore>,
}

impl HealthState {
    pub fn new(bot_alive: Arc<AtomicBool>, store: Arc<dyn SessionStore>) -> Arc<Self> {
        Arc::new(Self { bot_alive, store })
    }

    fn is_running(&self) -> bool {
        self.bot_alive.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

impl HealthResponse {
    fn new(status: &'static str) -> Json<Self> {
        Json(Self {
            status,
            service: "overlay-bot",
            version: env!("CARGO_PKG_VERSION"),
        })
    }
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_running() {
        (StatusCode::OK, HealthResponse::new("running"))
    } else {
        tracing::warn!("Health check failed: bot is not polling");
        (StatusCode::SERVICE_UNAVAILABLE, HealthResponse::new("stopped"))
    }
}

async fn ready(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if !state.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, HealthResponse::new("stopped"));
    }
    if !state.store.is_healthy().await {
        tracing::warn!("Readiness check failed: session store unreachable");
        return (StatusCode::SERVICE_UNAVAILABLE, HealthResponse::new("not_ready"));
    }
    (StatusCode::OK, HealthResponse::new("ready"))
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the health router.
pub fn build_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}
