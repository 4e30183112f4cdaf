//! Backend service template binary.
//!
//! # Request Pipeline
//!
//! ```text
//!     Client Request
//!     ─────────────▶ RequestIdLayer ──▶ CORS ──▶ TraceLayer ──▶ normalize_failures ──▶ handler
//!                    (x-request-id)                              (catch-all)           │
//!                                                                    │                 │ Err(Failure)
//!     Client Response                                                ▼                 │ / panic
//!     ◀───────────── x-request-id ◀────────────────────── error envelope + ◀───────────┘
//!                                                          JSON log line
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use service_template::config::load_config;
use service_template::http::HttpServer;
use service_template::lifecycle::{wait_for_signal, Shutdown};
use service_template::observability::init_logging;

#[derive(Parser)]
#[command(name = "service-template")]
#[command(about = "Backend service with request correlation and normalized errors", long_about = None)]
struct Cli {
    /// Optional TOML config file; environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.observability)?;

    let listener = TcpListener::bind(config.bind_address()).await?;
    let port = listener.local_addr()?.port();

    let server = HttpServer::new(config);

    tracing::info!(target: "bootstrap", "Service listening on port {}", port);
    tracing::info!(target: "bootstrap", "Environment: {}", server.config().environment);

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let name = wait_for_signal().await;
        tracing::info!(target: "bootstrap", signal = name, "Shutdown signal received");
        shutdown.trigger();
    });

    server.run(listener, signal).await?;

    tracing::info!(target: "bootstrap", "Shutdown complete");
    Ok(())
}
