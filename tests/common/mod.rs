//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path},
    http::{Request, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use service_template::config::ServiceConfig;
use service_template::http::{Failure, HttpServer, RequestId, Validate, Validated};
use service_template::observability::{JsonLineLayer, LogCapture};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

#[derive(Debug, Deserialize)]
pub struct Signup {
    pub email: String,
    pub password: String,
}

impl Validate for Signup {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.email.trim().is_empty() {
            problems.push("email is required".to_string());
        }
        if self.password.len() < 8 {
            problems.push("password too short".to_string());
        }
        problems
    }
}

async fn get_ticket() -> Result<Json<Value>, Failure> {
    Err(Failure::not_found("ticket not found"))
}

async fn get_report() -> Result<Json<Value>, Failure> {
    Err(io::Error::new(io::ErrorKind::TimedOut, "db timeout"))?;
    Ok(Json(Value::Null))
}

async fn get_traced() -> Result<Json<Value>, Failure> {
    Err(Failure::runtime("DbError", "db timeout").with_trace("0: reports::load\n1: main"))
}

async fn signup(Validated(body): Validated<Signup>) -> Json<Value> {
    Json(serde_json::json!({ "email": body.email }))
}

async fn crash() -> &'static str {
    panic!("worker crashed")
}

async fn crash_opaque() -> &'static str {
    std::panic::panic_any(42u32)
}

async fn get_order(Path(id): Path<u32>) -> Json<Value> {
    Json(serde_json::json!({ "id": id }))
}

async fn create_order(Json(order): Json<Value>) -> Json<Value> {
    Json(order)
}

async fn upload(Json(doc): Json<Value>) -> Json<Value> {
    Json(doc)
}

/// Echoes the correlation id of the request being handled on this task.
async fn whoami() -> String {
    tokio::task::yield_now().await;
    RequestId::current()
        .map(|id| id.to_string())
        .unwrap_or_default()
}

/// Routes that fail in every supported way.
pub fn failing_routes() -> Router {
    Router::new()
        .route("/tickets/{id}", get(get_ticket))
        .route("/reports", get(get_report))
        .route("/traced", get(get_traced))
        .route("/signup", post(signup))
        .route("/crash", get(crash))
        .route("/crash-opaque", get(crash_opaque))
        .route("/orders/{id}", get(get_order))
        .route("/orders", post(create_order))
        .route("/uploads", post(upload).layer(DefaultBodyLimit::max(16)))
        .route("/whoami", get(whoami))
}

/// The full service router (default config, `/api/v1` prefix) with
/// [`failing_routes`] mounted.
pub fn app() -> Router {
    HttpServer::with_routes(ServiceConfig::default(), failing_routes()).router()
}

/// Route JSON log lines for the current thread into a buffer.
pub fn capture_logs() -> (LogCapture, DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(JsonLineLayer::new(capture.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

/// ERROR-level records captured so far.
pub fn error_records(capture: &LogCapture) -> Vec<Value> {
    capture
        .records()
        .into_iter()
        .filter(|record| record["level"] == "ERROR")
        .collect()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
