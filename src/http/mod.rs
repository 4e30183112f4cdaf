//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → request.rs (assign/adopt x-request-id, attach to request scope)
//!     → [route handler] (service-specific, returns Result<_, Failure>)
//!     → failure.rs (classify the failure, if any)
//!     → response.rs (log at ERROR, render error envelope)
//!     → x-request-id mirrored onto the response
//! ```

pub mod extract;
pub mod failure;
pub mod request;
pub mod response;
pub mod server;

pub use extract::{Validate, Validated};
pub use failure::{ErrorCode, Failure, HttpPayload, NormalizedError};
pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use response::normalize_failures;
pub use server::{AppState, HttpServer};
