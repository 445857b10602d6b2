//! REST API server module
//!
//! Exposes the exporter over HTTP: streamed downloads, report summaries,
//! export control and a server-sent event feed.

use crate::{ReportExporter, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// All routes live under `/api/v1`.
///
/// ## Exports
/// - `GET /download?report=&records=&file_name=&target=` - Stream a report as a document
/// - `GET /reports/:report/summary` - Report metadata from the data source
/// - `GET /exports` - Exports currently running
/// - `DELETE /exports/:id` - Cancel a running export
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /events` - Server-sent events stream
pub fn create_router(exporter: Arc<ReportExporter>) -> Router {
    let api = exporter.config().api.clone();
    let state = AppState::new(exporter);

    let routes = Router::new()
        // Exports
        .route("/download", get(routes::download))
        .route("/reports/:report/summary", get(routes::report_summary))
        .route("/exports", get(routes::list_exports))
        .route("/exports/:id", delete(routes::cancel_export))
        // System
        .route("/health", get(routes::health_check))
        .route("/events", get(routes::event_stream));

    let router = Router::new()
        .nest("/api/v1", routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // Apply CORS middleware if enabled in config
    if api.cors_enabled {
        router.layer(build_cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address
///
/// Runs until the listener fails or the task is dropped.
///
/// # Example
///
/// ```no_run
/// use report_stream::{Config, ReportExporter, SyntheticDataSource};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = Arc::new(SyntheticDataSource::new(100_000, 7));
/// let exporter = Arc::new(ReportExporter::new(Config::default(), source)?);
///
/// // Start API server (blocks until shutdown)
/// report_stream::api::start_api_server(exporter).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(exporter: Arc<ReportExporter>) -> Result<()> {
    let bind_address = exporter.config().api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(exporter);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(bind_address),
        "API server listening"
    );

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
