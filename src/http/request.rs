//! Request correlation.
//!
//! # Responsibilities
//! - Adopt the caller's `x-request-id` or generate a UUID v4
//! - Make the id available to everything downstream (extensions, extractor,
//!   task-local scope, tracing span)
//! - Mirror the id onto the response header
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Caller-supplied ids are trimmed but otherwise accepted verbatim, so trace
//!   chains survive across services
//! - The id is immutable once assigned; this layer never fails

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation identifier, inbound and outbound.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

tokio::task_local! {
    static CURRENT_REQUEST_ID: RequestId;
}

/// Per-request correlation context.
///
/// Exactly one per request; cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestId {
    value: Arc<str>,
    header: HeaderValue,
}

impl RequestId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let value = Uuid::new_v4().to_string();
        let header = HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""));
        Self {
            value: value.into(),
            header,
        }
    }

    /// Adopt the inbound header if it is non-blank after trimming,
    /// otherwise generate a new id.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(&X_REQUEST_ID)
            .and_then(Self::adopt)
            .unwrap_or_else(Self::generate)
    }

    fn adopt(raw: &HeaderValue) -> Option<Self> {
        let trimmed = raw.as_bytes().trim_ascii();
        if trimmed.is_empty() {
            return None;
        }
        // A sub-slice of a valid header value is itself valid.
        let header = HeaderValue::from_bytes(trimmed).ok()?;
        Some(Self {
            value: String::from_utf8_lossy(trimmed).into(),
            header,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn header_value(&self) -> &HeaderValue {
        &self.header
    }

    /// The id of the request currently being handled on this task, if any.
    pub fn current() -> Option<Self> {
        CURRENT_REQUEST_ID.try_with(Clone::clone).ok()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestId").field(&&*self.value).finish()
    }
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId::from_headers(&parts.headers)))
    }
}

/// Access to the correlation id stored on a request.
pub trait RequestIdExt {
    /// `None` when [`RequestIdLayer`] is not installed.
    fn request_id(&self) -> Option<&RequestId>;
}

impl<B> RequestIdExt for axum::http::Request<B> {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }
}

/// Layer assigning a [`RequestId`] to every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Service produced by [`RequestIdLayer`].
#[derive(Clone, Debug)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = RequestId::from_headers(req.headers());
        req.extensions_mut().insert(request_id.clone());

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let fut = CURRENT_REQUEST_ID.scope(request_id.clone(), self.inner.call(req));

        Box::pin(
            async move {
                let mut response = fut.await?;
                response
                    .headers_mut()
                    .insert(X_REQUEST_ID, request_id.header_value().clone());
                Ok(response)
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use std::collections::HashSet;
    use tower::ServiceExt;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_adopts_trimmed_header() {
        let id = RequestId::from_headers(&headers_with("  abc-123\t"));
        assert_eq!(id.as_str(), "abc-123");
        assert_eq!(id.header_value(), "abc-123");
    }

    #[test]
    fn test_arbitrary_values_accepted_verbatim() {
        let id = RequestId::from_headers(&headers_with("not a uuid; span=7"));
        assert_eq!(id.as_str(), "not a uuid; span=7");
    }

    #[test]
    fn test_blank_header_regenerates() {
        let id = RequestId::from_headers(&headers_with("   "));
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"X-Request-ID").unwrap(),
            HeaderValue::from_static("upper"),
        );
        assert_eq!(RequestId::from_headers(&headers).as_str(), "upper");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000)
            .map(|_| RequestId::generate().as_str().to_owned())
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[tokio::test]
    async fn test_layer_mirrors_inbound_id() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RequestIdLayer);

        let request = axum::http::Request::builder()
            .uri("/")
            .header("x-request-id", " trace-42 ")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.headers()[X_REQUEST_ID], "trace-42");
    }

    #[tokio::test]
    async fn test_layer_generates_when_absent() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RequestIdLayer);

        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let id = response.headers()[X_REQUEST_ID].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_extractor_and_task_local_agree() {
        async fn handler(id: RequestId) -> String {
            let current = RequestId::current().map(|c| c.to_string()).unwrap_or_default();
            format!("{id}|{current}")
        }

        let app = Router::new()
            .route("/", get(handler))
            .layer(RequestIdLayer);

        let request = axum::http::Request::builder()
            .uri("/")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

        assert_eq!(&body[..], b"abc-123|abc-123");
    }

    #[test]
    fn test_no_current_outside_request() {
        assert!(RequestId::current().is_none());
    }
}
