//! Metrics collection.
//!
//! # Metrics
//! - `http_errors_total` (counter): normalized failures by `code` and `status`
//!
//! # Design Decisions
//! - Uses the `metrics` facade; installing an exporter is left to the service
//! - Label values are the stable error code, never free text

use crate::http::failure::ErrorCode;

/// Count one normalized failure.
pub fn record_failure(status: u16, code: ErrorCode) {
    ::metrics::counter!(
        "http_errors_total",
        "code" => code.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
