//! Structured logging.
//!
//! # Responsibilities
//! - Render every log event as one self-contained JSON line
//! - Initialize the tracing subscriber (filter + output layer)
//! - Map tracing levels onto the service's level vocabulary
//!
//! # Record Shape
//! ```text
//! { "timestamp": ISO-8601, "level": "ERROR"|"WARN"|"INFO"|"DEBUG"|"VERBOSE",
//!   "context": <event target>, "message": string, "trace"?: string,
//!   "requestId"?: string, "status"?: number, "code"?: string,
//!   "path"?: string, "method"?: string, ...other event fields }
//! ```
//!
//! # Design Decisions
//! - Call sites use plain `tracing` macros; this layer owns the format
//! - One line per event, written with a single `write_all`
//! - No sampling, rate limiting or redaction
//! - `trace` is only kept on ERROR records

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, ObservabilityConfig};

/// Severity as it appears in the `level` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Verbose,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::TRACE => Level::Verbose,
        }
    }
}

/// A single structured log line. Emitted immediately, never retained.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: Level,
    pub context: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Any other event fields, flattened into the object.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl LogRecord {
    /// Create a record stamped with the current time.
    pub fn new(level: Level, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp_now(),
            level,
            context: context.into(),
            message: message.into(),
            trace: None,
            request_id: None,
            status: None,
            code: None,
            path: None,
            method: None,
            fields: BTreeMap::new(),
        }
    }

    /// Attach a backtrace. Ignored unless the record is at ERROR level.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        if self.level == Level::Error {
            self.trace = Some(trace.into());
        }
        self
    }

    /// Render the record as one JSON line (without the trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            serde_json::json!({
                "timestamp": self.timestamp,
                "level": self.level,
                "context": self.context,
                "message": self.message,
            })
            .to_string()
        })
    }
}

/// ISO-8601 UTC timestamp with millisecond precision, e.g. `2026-01-01T00:00:00.000Z`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Collects event fields into the named slots of a [`LogRecord`].
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    trace: Option<String>,
    request_id: Option<String>,
    status: Option<u16>,
    code: Option<String>,
    path: Option<String>,
    method: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl RecordVisitor {
    fn put(&mut self, name: &str, value: Value) {
        match name {
            "message" => self.message = Some(into_text(value)),
            "trace" => self.trace = Some(into_text(value)),
            "request_id" => self.request_id = Some(into_text(value)),
            "code" => self.code = Some(into_text(value)),
            "path" => self.path = Some(into_text(value)),
            "method" => self.method = Some(into_text(value)),
            "status" => match value.as_u64().and_then(|s| u16::try_from(s).ok()) {
                Some(status) => self.status = Some(status),
                None => {
                    self.fields.insert(name.to_owned(), value);
                }
            },
            "timestamp" | "level" | "context" => {
                self.fields.insert(format!("field.{name}"), value);
            }
            _ => {
                self.fields.insert(name.to_owned(), value);
            }
        }
    }

    fn into_record(self, level: Level, context: &str) -> LogRecord {
        let mut record = LogRecord::new(level, context, self.message.unwrap_or_default());
        if let Some(trace) = self.trace {
            record = record.with_trace(trace);
        }
        record.request_id = self.request_id;
        record.status = self.status;
        record.code = self.code;
        record.path = self.path;
        record.method = self.method;
        record.fields = self.fields;
        record
    }
}

fn into_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), Value::String(value.to_owned()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field.name(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field.name(), Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field.name(), Value::String(format!("{value:?}")));
    }
}

/// Tracing layer that writes each event as a [`LogRecord`] line.
pub struct JsonLineLayer<W = fn() -> io::Stdout> {
    make_writer: W,
}

impl JsonLineLayer {
    /// Layer writing to standard output.
    pub fn stdout() -> Self {
        Self {
            make_writer: io::stdout,
        }
    }
}

impl<W> JsonLineLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    pub fn new(make_writer: W) -> Self {
        Self { make_writer }
    }
}

impl<S, W> Layer<S> for JsonLineLayer<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let record = visitor.into_record(Level::from(*metadata.level()), metadata.target());
        let mut line = record.to_line();
        line.push('\n');

        let mut writer = self.make_writer.make_writer_for(metadata);
        let _ = writer.write_all(line.as_bytes());
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(JsonLineLayer::stdout()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
}

/// In-memory sink for asserting on emitted lines in tests.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Raw lines written so far.
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Lines parsed as JSON objects; lines that do not parse are skipped.
    pub fn records(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
