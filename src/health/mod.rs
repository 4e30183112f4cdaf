//! Liveness and readiness endpoints.
//!
//! # Routes
//! ```text
//! GET /healthz → { status: "ok", service, timestamp }
//! GET /readyz  → { status: "ready", checks: {} }
//! ```
//!
//! Both are mounted under the configured global prefix. Readiness reports no
//! dependency checks; the service holds no connections of its own.

pub mod handlers;

use axum::{routing::get, Router};

use self::handlers::{healthz, readyz};
use crate::http::server::AppState;

pub fn setup_health_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}
