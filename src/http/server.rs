//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with health and service routes
//! - Mount everything under the configured global prefix
//! - Wire up middleware (request ID, CORS, tracing, failure normalization,
//!   panic capture)
//! - Serve on a listener until shutdown is signalled
//!
//! # Layer order (outermost first)
//! ```text
//! RequestIdLayer → CorsLayer → TraceLayer → normalize_failures → CatchPanicLayer → routes
//! ```

use std::io;
use std::sync::Arc;

use axum::{http::HeaderValue, middleware, Router};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{HttpConfig, ServiceConfig};
use crate::health::setup_health_router;
use crate::http::request::{RequestIdLayer, X_REQUEST_ID};
use crate::http::response::{failure_from_panic, normalize_failures, route_not_found};
use crate::lifecycle::ShutdownSignal;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service_name: Arc<str>,
}

/// HTTP server for a service built from the template.
pub struct HttpServer {
    router: Router,
    config: ServiceConfig,
}

impl HttpServer {
    /// Server exposing only the health endpoints.
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_routes(config, Router::new())
    }

    /// Server exposing the health endpoints plus `routes`, all behind the
    /// correlation and failure-normalization pipeline.
    pub fn with_routes(config: ServiceConfig, routes: Router) -> Self {
        let state = AppState {
            service_name: Arc::from(config.service_name.as_str()),
        };
        let router = Self::build_router(&config, state, routes);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServiceConfig, state: AppState, routes: Router) -> Router {
        let api = setup_health_router(state).merge(routes);
        let app = match config.http.prefix_path() {
            Some(prefix) => Router::new().nest(&prefix, api),
            None => api,
        };

        app.fallback(route_not_found)
            .layer(CatchPanicLayer::custom(failure_from_panic))
            .layer(middleware::from_fn(normalize_failures))
            .layer(TraceLayer::new_for_http().on_failure(()))
            .layer(cors_layer(&config.http))
            .layer(RequestIdLayer)
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.config.service_name,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

/// CORS policy. Credentials are allowed, so every allow-list mirrors the
/// request instead of using `*`.
fn cors_layer(http: &HttpConfig) -> CorsLayer {
    let origins = if http.allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            http.allowed_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([X_REQUEST_ID])
}
