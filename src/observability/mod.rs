//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (one JSON line per tracing event)
//!     → metrics.rs (error counters)
//!
//! Consumers:
//!     → stdout, collected by whatever runs the process
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every error line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, JsonLineLayer, Level, LogCapture, LogRecord};
