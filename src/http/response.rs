//! Error response handling.
//!
//! # Responsibilities
//! - Catch every failure that escapes a handler (returned, panicked, a bare
//!   framework error status, or a plain-text extractor rejection) and
//!   classify it once
//! - Log it at ERROR with the request's correlation id before responding
//! - Render the fixed error envelope
//!
//! # Per-request flow
//! ```text
//! HANDLING → FAILED → NORMALIZED → LOGGED → RESPONDED
//! ```
//!
//! # Design Decisions
//! - This is the terminal handler: nothing propagates past it
//! - Backtraces go to the log line only, never the response body
//! - Rendering failure degrades to a hardcoded 500 body

use std::any::Any;

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::http::failure::{ErrorCode, Failure, NormalizedError};
use crate::http::request::{RequestId, RequestIdExt};
use crate::observability::metrics;

/// Served when the envelope itself cannot be rendered.
pub const FALLBACK_BODY: &str =
    r#"{"error":{"code":"INTERNAL_ERROR","message":"Unexpected error"},"meta":{}}"#;

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
    meta: Meta<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: ErrorCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

#[derive(Serialize)]
struct Meta<'a> {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

impl NormalizedError {
    /// The JSON body sent to the caller.
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: &self.message,
                details: self.details.as_ref(),
            },
            meta: Meta {
                request_id: self.request_id.as_deref(),
            },
        })
    }
}

impl IntoResponse for NormalizedError {
    fn into_response(self) -> Response {
        match self.to_body() {
            Ok(body) => json_response(self.status, body),
            Err(_) => fallback_response(),
        }
    }
}

fn json_response(status: StatusCode, body: impl Into<axum::body::Body>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Minimal 500 used when normalization itself goes wrong.
pub fn fallback_response() -> Response {
    json_response(StatusCode::INTERNAL_SERVER_ERROR, FALLBACK_BODY)
}

/// Classify, log and render one failure.
pub fn report_failure(
    failure: &Failure,
    request_id: Option<&RequestId>,
    method: &Method,
    path: &str,
) -> Response {
    let normalized = failure.normalize(request_id);

    tracing::error!(
        request_id = normalized.request_id.as_deref(),
        status = normalized.status.as_u16(),
        code = %normalized.code,
        path = path,
        method = %method,
        trace = failure.trace(),
        "{}",
        normalized.message
    );
    metrics::record_failure(normalized.status.as_u16(), normalized.code);

    normalized.into_response()
}

/// Catch-all middleware. Install inside [`RequestIdLayer`](crate::http::RequestIdLayer)
/// so the correlation id is already assigned.
pub async fn normalize_failures(req: Request, next: Next) -> Response {
    let request_id = req.request_id().cloned();
    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let route_path = req.uri().path().to_owned();

    let mut response = next.run(req).await;

    let failure = match response.extensions_mut().remove::<Failure>() {
        Some(failure) => failure,
        None => match unclaimed_error(&response) {
            Some(UnclaimedError::Bare) => route_failure(response.status(), &method, &route_path),
            Some(UnclaimedError::Text) => rejection_failure(response).await,
            None => return response,
        },
    };

    report_failure(&failure, request_id.as_ref(), &method, &path)
}

/// Upper bound on how much of a framework rejection body is read back.
const REJECTION_BODY_LIMIT: usize = 4 * 1024;

/// Error response that did not come from a [`Failure`].
enum UnclaimedError {
    /// No body at all: unmatched route, wrong method.
    Bare,
    /// Plain-text body: extractor rejections (`Path`, `Query`, `Json`,
    /// body limit).
    Text,
}

fn unclaimed_error(response: &Response) -> Option<UnclaimedError> {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return None;
    }
    match response.headers().get(header::CONTENT_TYPE) {
        None => Some(UnclaimedError::Bare),
        Some(content_type) if is_plain_text(content_type) => Some(UnclaimedError::Text),
        Some(_) => None,
    }
}

fn is_plain_text(content_type: &HeaderValue) -> bool {
    content_type
        .to_str()
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/plain"))
        .unwrap_or(false)
}

/// Turn a plain-text rejection into an HTTP-intent failure carrying its text.
async fn rejection_failure(response: Response) -> Failure {
    let status = response.status();
    let text = match axum::body::to_bytes(response.into_body(), REJECTION_BODY_LIMIT).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_owned(),
        Err(_) => String::new(),
    };

    if text.is_empty() {
        Failure::status(status, status.canonical_reason().unwrap_or("Error"))
    } else {
        Failure::status(status, text)
    }
}

fn route_failure(status: StatusCode, method: &Method, path: &str) -> Failure {
    match status {
        s if s == StatusCode::NOT_FOUND || s == StatusCode::METHOD_NOT_ALLOWED => {
            Failure::status(s, format!("Cannot {method} {path}"))
        }
        s => Failure::status(s, s.canonical_reason().unwrap_or("Error")),
    }
}

/// Router fallback for unmatched paths.
pub async fn route_not_found(method: Method, uri: axum::http::Uri) -> Failure {
    route_failure(StatusCode::NOT_FOUND, &method, uri.path())
}

/// Panic handler for `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn failure_from_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    Failure::from_panic(payload).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestIdLayer;
    use axum::{body::Body, middleware, routing::get, Router};
    use serde_json::json;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app(router: Router) -> Router {
        router
            .fallback(route_not_found)
            .layer(middleware::from_fn(normalize_failures))
            .layer(RequestIdLayer)
    }

    #[test]
    fn test_envelope_shape() {
        let normalized = Failure::not_found("ticket not found").normalize(None);
        let body: Value = serde_json::from_slice(&normalized.to_body().unwrap()).unwrap();

        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "ticket not found");
        assert_eq!(body["error"]["details"]["statusCode"], 404);
        assert_eq!(body["meta"], json!({}));
    }

    #[test]
    fn test_details_omitted_when_absent() {
        let body: Value =
            serde_json::from_slice(&Failure::Unknown.normalize(None).to_body().unwrap()).unwrap();
        assert!(body["error"].get("details").is_none());
    }

    #[test]
    fn test_fallback_body_is_valid_envelope() {
        let body: Value = serde_json::from_str(FALLBACK_BODY).unwrap();
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_handler_failure_is_normalized() {
        let app = app(Router::new().route(
            "/tickets/{id}",
            get(|| async { Err::<(), _>(Failure::forbidden("not your ticket")) }),
        ));

        let request = axum::http::Request::builder()
            .uri("/tickets/9")
            .header("x-request-id", "req-1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()["x-request-id"], "req-1");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert_eq!(body["meta"]["requestId"], "req-1");
    }

    #[tokio::test]
    async fn test_unmatched_route() {
        let app = app(Router::new().route("/", get(|| async { "ok" })));

        let request = axum::http::Request::builder()
            .uri("/missing")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Cannot GET /missing");
    }

    #[tokio::test]
    async fn test_wrong_method_is_normalized() {
        let app = app(Router::new().route("/", get(|| async { "ok" })));

        let request = axum::http::Request::builder()
            .method("DELETE")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "HTTP_405");
        assert_eq!(body["error"]["message"], "Cannot DELETE /");
    }

    #[tokio::test]
    async fn test_plain_text_rejection_is_normalized() {
        let app = app(Router::new().route(
            "/",
            get(|| async { (StatusCode::CONFLICT, "slot already taken") }),
        ));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "HTTP_409");
        assert_eq!(body["error"]["message"], "slot already taken");
    }

    #[tokio::test]
    async fn test_json_error_response_untouched() {
        let app = app(Router::new().route(
            "/",
            get(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    axum::Json(json!({ "custom": true })),
                )
            }),
        ));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await, json!({ "custom": true }));
    }

    #[tokio::test]
    async fn test_successful_response_untouched() {
        let app = app(Router::new().route("/", get(|| async { "ok" })));

        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ok");
    }
}
