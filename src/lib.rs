//! # report-stream
//!
//! Streams large paginated report datasets into a single downloadable
//! document without holding the dataset in memory.
//!
//! ## How an export runs
//!
//! - W workers claim non-overlapping `(offset, size)` pages from a shared
//!   allocator; page sizes adapt to observed fetch latency
//! - fetched pages land in a reassembly buffer that releases them strictly in
//!   offset order, whatever order the fetches finished in
//! - a single sink writes the header once, the rows as they arrive and the
//!   closing structure after the last page
//!
//! Output formats are delimited text, SpreadsheetML workbooks and PDF.
//!
//! ## Quick Start
//!
//! ```no_run
//! use report_stream::{Config, ExportParams, ReportExporter, SyntheticDataSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(SyntheticDataSource::new(10_000, 42));
//!     let exporter = ReportExporter::new(Config::default(), source)?;
//!
//!     // Subscribe to events
//!     let mut events = exporter.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = exporter.prepare(ExportParams {
//!         report: "employees".into(),
//!         records: 10_000,
//!         file_name: None,
//!         target: "xls".into(),
//!         user: None,
//!     })?;
//!     let file = tokio::fs::File::create(&request.file_name).await?;
//!     let summary = exporter.export(request, file).await?;
//!     println!("wrote {} bytes", summary.bytes_written);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Document writers and the export sink
pub mod export;
/// Adaptive page sizing and task allocation
pub mod paging;
/// Export orchestration
pub mod pipeline;
/// Out-of-order chunk reassembly
pub mod reassembly;
/// Retry logic with exponential backoff
pub mod retry;
/// Remote and synthetic data sources
pub mod source;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{
    ApiConfig, Config, DeliveryMode, DocumentConfig, PagingConfig, PipelineConfig, RetryConfig,
    SourceConfig,
};
pub use error::{
    ApiError, Error, ErrorDetail, FetchError, ReassemblyError, Result, ToHttpStatus,
    ValidationError, WriteError,
};
pub use export::{DocumentStructure, DocumentWriter, OutputStream};
pub use pipeline::ReportExporter;
pub use reassembly::{ChunkConsumer, ReassemblyBuffer};
pub use source::{DataSource, HttpDataSource, SyntheticDataSource};
pub use types::{
    DataChunk, DownloadRequest, Event, ExportId, ExportInfo, ExportParams, ExportSummary,
    FetchTask, Page, PipelineState, ReadyChunk, ReportSummary, Row, TargetFormat,
};

/// Serve the API until a termination signal arrives, then shut down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// In-flight exports are cancelled and given time to unwind before this
/// returns.
///
/// # Example
///
/// ```no_run
/// use report_stream::{Config, HttpDataSource, ReportExporter, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let source = Arc::new(HttpDataSource::new(&config.source)?);
///     let exporter = Arc::new(ReportExporter::new(config, source)?);
///
///     run_with_shutdown(exporter).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(exporter: std::sync::Arc<ReportExporter>) -> Result<()> {
    let server = tokio::spawn(api::start_api_server(exporter.clone()));

    tokio::select! {
        _ = wait_for_signal() => {}
        served = server => {
            // The server only returns on failure
            match served {
                Ok(Err(e)) => {
                    exporter.shutdown().await?;
                    return Err(e);
                }
                Ok(Ok(())) => {}
                Err(e) => tracing::error!(error = %e, "API server task failed"),
            }
        }
    }

    exporter.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
