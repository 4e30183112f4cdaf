//! Failure classification.
//!
//! Handlers return `Result<_, Failure>`. A failure is classified exactly once,
//! when the catch-all middleware (see `response.rs`) turns it into a
//! [`NormalizedError`].
//!
//! # Classification (priority order)
//! ```text
//! Http { status, payload }   → status adopted, code from status table
//!     object payload, status 400, list-valued "message"
//!                            → VALIDATION_ERROR, "Validation error", {fields}
//! Runtime { name, message }  → 500 INTERNAL_ERROR, {name}
//! Unknown                    → 500 INTERNAL_ERROR, "Unexpected error"
//! ```

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::http::request::RequestId;

const UNEXPECTED_ERROR: &str = "Unexpected error";
const VALIDATION_SUMMARY: &str = "Validation error";

/// Payload attached to an HTTP-intent failure.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpPayload {
    /// Plain text, used directly as the message.
    Message(String),
    /// Structured payload, conventionally `{ statusCode, message, error }`.
    Object(Map<String, Value>),
}

impl From<&str> for HttpPayload {
    fn from(message: &str) -> Self {
        HttpPayload::Message(message.to_owned())
    }
}

impl From<String> for HttpPayload {
    fn from(message: String) -> Self {
        HttpPayload::Message(message)
    }
}

impl From<Map<String, Value>> for HttpPayload {
    fn from(object: Map<String, Value>) -> Self {
        HttpPayload::Object(object)
    }
}

/// Anything that can go wrong while handling a request.
#[derive(Debug, Clone)]
pub enum Failure {
    /// Explicitly carries an intended status and payload.
    Http {
        status: StatusCode,
        payload: HttpPayload,
    },
    /// An ordinary error with no HTTP intent.
    Runtime {
        name: String,
        message: String,
        trace: Option<String>,
    },
    /// A failure of unrecognizable shape, e.g. a panic with a non-string payload.
    Unknown,
}

impl Failure {
    pub fn http(status: StatusCode, payload: impl Into<HttpPayload>) -> Self {
        Failure::Http {
            status,
            payload: payload.into(),
        }
    }

    /// HTTP-intent failure with the conventional `{statusCode, message, error}` object.
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        let mut object = Map::new();
        object.insert("statusCode".into(), json!(status.as_u16()));
        object.insert("message".into(), Value::String(message.into()));
        object.insert(
            "error".into(),
            json!(status.canonical_reason().unwrap_or("Error")),
        );
        Self::http(status, object)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::status(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::status(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::status(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, message)
    }

    /// 400 carrying one message per rejected field.
    pub fn validation<I, M>(fields: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        let fields: Vec<Value> = fields
            .into_iter()
            .map(|m| Value::String(m.into()))
            .collect();
        let mut object = Map::new();
        object.insert("statusCode".into(), json!(400));
        object.insert("message".into(), Value::Array(fields));
        object.insert("error".into(), json!("Bad Request"));
        Self::http(StatusCode::BAD_REQUEST, object)
    }

    pub fn runtime(name: impl Into<String>, message: impl Into<String>) -> Self {
        Failure::Runtime {
            name: name.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Attach backtrace text. Only runtime failures keep it.
    pub fn with_trace(mut self, text: impl Into<String>) -> Self {
        if let Failure::Runtime { trace, .. } = &mut self {
            *trace = Some(text.into());
        }
        self
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => Some(*message),
            Err(payload) => payload.downcast_ref::<&str>().map(|s| (*s).to_owned()),
        };
        match message {
            Some(message) => Self::runtime("panic", message),
            None => Failure::Unknown,
        }
    }

    /// Backtrace text, present only for runtime failures that captured one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Failure::Runtime { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }

    /// Status the response will carry.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Failure::Http { status, .. } => *status,
            Failure::Runtime { .. } | Failure::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Classify this failure. Pure: the same failure always yields the same
    /// fields.
    pub fn normalize(&self, request_id: Option<&RequestId>) -> NormalizedError {
        let (status, code, message, details) = match self {
            Failure::Http { status, payload } => {
                let (code, message, details) = classify_http(*status, payload);
                (*status, code, message, details)
            }
            Failure::Runtime { name, message, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Internal,
                message.clone(),
                Some(json!({ "name": name })),
            ),
            Failure::Unknown => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Internal,
                UNEXPECTED_ERROR.to_owned(),
                None,
            ),
        };

        NormalizedError {
            status,
            code,
            message,
            details,
            request_id: request_id.map(|id| id.as_str().to_owned()),
        }
    }
}

fn classify_http(status: StatusCode, payload: &HttpPayload) -> (ErrorCode, String, Option<Value>) {
    match payload {
        HttpPayload::Message(message) => (ErrorCode::for_status(status), message.clone(), None),
        HttpPayload::Object(object) => {
            if status == StatusCode::BAD_REQUEST {
                if let Some(Value::Array(fields)) = object.get("message") {
                    return (
                        ErrorCode::Validation,
                        VALIDATION_SUMMARY.to_owned(),
                        Some(json!({ "fields": fields })),
                    );
                }
            }
            (
                ErrorCode::for_status(status),
                object_message(object),
                Some(Value::Object(object.clone())),
            )
        }
    }
}

fn object_message(object: &Map<String, Value>) -> String {
    match object.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        None | Some(Value::Null) => UNEXPECTED_ERROR.to_owned(),
        Some(other) => other.to_string(),
    }
}

/// Last path segment of a type name, without generics.
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_owned()
}

/// Any error converts into a runtime failure, so handlers can use `?`.
impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::from_error(err, Backtrace::capture())
    }
}

impl Failure {
    /// Runtime failure for `err`; the trace is kept only if `backtrace` was captured.
    fn from_error<E: std::error::Error>(err: E, backtrace: Backtrace) -> Self {
        let failure = Self::runtime(short_type_name::<E>(), err.to_string());
        if backtrace.status() == BacktraceStatus::Captured {
            failure.with_trace(backtrace.to_string())
        } else {
            failure
        }
    }
}

/// Marks the response so the catch-all middleware can normalize it.
impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let mut response = self.status_code().into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Stable machine token for a class of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Validation,
    Unauthenticated,
    Forbidden,
    NotFound,
    /// Any other explicitly intended status.
    Http(u16),
    Internal,
}

impl ErrorCode {
    pub fn for_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 => ErrorCode::Unauthenticated,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            other => ErrorCode::Http(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Validation => f.write_str("VALIDATION_ERROR"),
            ErrorCode::Unauthenticated => f.write_str("UNAUTHENTICATED"),
            ErrorCode::Forbidden => f.write_str("FORBIDDEN"),
            ErrorCode::NotFound => f.write_str("NOT_FOUND"),
            ErrorCode::Http(status) => write!(f, "HTTP_{status}"),
            ErrorCode::Internal => f.write_str("INTERNAL_ERROR"),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The classified outcome of one failed request.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
    pub request_id: Option<String>,
}
