//! Backend service template.
//!
//! Every service built from this crate gets the same request pipeline:
//! a correlation id on every request and response, one stable JSON error
//! envelope for every failure, and one JSON log line per event.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::ServiceConfig;
pub use http::{Failure, HttpServer, RequestId};
pub use lifecycle::Shutdown;
