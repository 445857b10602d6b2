//! Export orchestration
//!
//! [`ReportExporter`] is the entry point. It validates requests, tracks the
//! exports in flight and hands each one to the coordinator:
//! - [`coordinator`] - lifecycle of one export (workers, sink, deadline, cancellation)
//! - [`worker`] - fetch loop run by each of the W workers
//! - [`progress`] - periodic progress events

mod coordinator;
mod progress;
mod worker;


use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result, ValidationError};
use crate::export::{DocumentStructure, ExportCounters, writer_for};
use crate::source::DataSource;
use crate::types::{
    DownloadRequest, Event, ExportId, ExportInfo, ExportParams, ExportSummary, ReportSummary,
    TargetFormat,
};
use coordinator::{ExportRun, run_export};

/// How long `shutdown` waits for in-flight exports to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Bookkeeping for an export that is still running
struct ActiveExport {
    request: DownloadRequest,
    cancel: CancellationToken,
    counters: Arc<ExportCounters>,
}

/// Removes an export from the active map when its `export` call ends
///
/// Runs on completion and also when the caller drops the future midway.
struct Registration {
    active: Arc<Mutex<HashMap<ExportId, ActiveExport>>>,
    id: ExportId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.try_lock() {
            active.remove(&self.id);
            return;
        }
        // Contended: finish the removal on the runtime
        let active = self.active.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    active.lock().await.remove(&id);
                });
            }
            Err(_) => tracing::warn!(export_id = id.0, "no runtime to deregister export"),
        }
    }
}

/// Streams reports from a data source into documents
///
/// Cloning is cheap; all clones share the same exports, events and shutdown
/// state.
#[derive(Clone)]
pub struct ReportExporter {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Injected data source
    source: Arc<dyn DataSource>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    next_id: Arc<AtomicU64>,
    /// Parent of every export's cancellation token
    root_token: CancellationToken,
    /// Set to false once shutdown starts
    accepting_new: Arc<AtomicBool>,
    active: Arc<Mutex<HashMap<ExportId, ActiveExport>>>,
}

impl ReportExporter {
    /// Create an exporter reading from `source`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(config: Config, source: Arc<dyn DataSource>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            source,
            event_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            root_token: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to export events
    ///
    /// Delivery is best effort: a slow subscriber misses events rather than
    /// holding up an export.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Validate trigger input and assign an export id
    ///
    /// Nothing is fetched here; a rejected request never starts a worker.
    pub fn prepare(&self, params: ExportParams) -> Result<DownloadRequest> {
        let report = params.report.trim();
        if report.is_empty() {
            return Err(ValidationError::EmptyReport.into());
        }
        if params.records < 1 {
            return Err(ValidationError::NonPositiveRecords(params.records).into());
        }
        let total_records = params.records as u64;
        let max = self.config.pipeline.max_records;
        if total_records > max {
            return Err(ValidationError::TooManyRecords {
                requested: total_records,
                max,
            }
            .into());
        }
        let format: TargetFormat = params.target.parse()?;

        let file_name = params
            .file_name
            .as_deref()
            .map(sanitize_file_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| sanitize_file_name(report));
        let file_name = if file_name.is_empty() {
            with_extension("report".to_string(), format)
        } else {
            with_extension(file_name, format)
        };

        Ok(DownloadRequest {
            id: ExportId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            report: report.to_string(),
            total_records,
            format,
            file_name,
            user: params
                .user
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
        })
    }

    /// Summary of `report` from the data source
    pub async fn summary(&self, report: &str) -> Result<ReportSummary> {
        Ok(self.source.summary(report).await?)
    }

    /// Record count for `report`, used when the caller did not give one
    pub async fn resolve_record_count(&self, report: &str) -> Result<i64> {
        let summary = self.summary(report).await?;
        Ok(i64::try_from(summary.total_records).unwrap_or(i64::MAX))
    }

    /// Run `request` to completion, writing the document into `output`
    ///
    /// The output is shut down after the closing structure is written. On
    /// failure it is dropped as-is, so a reader sees a truncated document.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the run, [`Error::Timeout`] when the
    /// deadline expires, [`Error::Cancelled`] after [`Self::cancel_export`] and
    /// [`Error::ShuttingDown`] once shutdown has started.
    pub async fn export<W>(&self, request: DownloadRequest, output: W) -> Result<ExportSummary>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let writer = writer_for(
            request.format,
            &self.config.document,
            self.document_structure(&request).await,
        );

        let cancel = self.root_token.child_token();
        let counters = Arc::new(ExportCounters::default());
        self.active.lock().await.insert(
            request.id,
            ActiveExport {
                request: request.clone(),
                cancel: cancel.clone(),
                counters: counters.clone(),
            },
        );

        let _registration = Registration {
            active: self.active.clone(),
            id: request.id,
        };
        run_export(ExportRun {
            request,
            config: self.config.clone(),
            source: self.source.clone(),
            writer,
            output: Box::new(output),
            event_tx: self.event_tx.clone(),
            cancel,
            shutdown: self.root_token.clone(),
            counters,
        })
        .await
    }

    /// Cancel a running export
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no export with `id` is running.
    pub async fn cancel_export(&self, id: ExportId) -> Result<()> {
        let active = self.active.lock().await;
        let export = active
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("export {id}")))?;

        tracing::info!(export_id = id.0, "cancelling export");
        export.cancel.cancel();
        Ok(())
    }

    /// Exports currently running, ordered by id
    pub async fn active_exports(&self) -> Vec<ExportInfo> {
        let active = self.active.lock().await;
        let mut exports: Vec<ExportInfo> = active
            .values()
            .map(|export| ExportInfo {
                id: export.request.id,
                report: export.request.report.clone(),
                file_name: export.request.file_name.clone(),
                format: export.request.format,
                total_records: export.request.total_records,
                records_written: export.counters.records_written.load(Ordering::Relaxed),
                bytes_written: export.counters.bytes_written.load(Ordering::Relaxed),
            })
            .collect();
        exports.sort_by_key(|e| e.id);
        exports
    }

    /// Stop accepting exports and cancel the ones in flight
    ///
    /// Waits up to 30 seconds for running exports to unwind.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        self.root_token.cancel();

        match tokio::time::timeout(SHUTDOWN_GRACE, self.wait_for_active_exports()).await {
            Ok(()) => tracing::info!("All active exports stopped"),
            Err(_) => tracing::warn!("Timeout waiting for exports to stop, proceeding with shutdown"),
        }
        Ok(())
    }

    async fn wait_for_active_exports(&self) {
        loop {
            let active_count = self.active.lock().await.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for active exports to stop");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Title, criteria and footer decoration for the document
    ///
    /// Delimited text carries no decoration, so its summary is never fetched.
    /// For the other formats a failed lookup falls back to the report id.
    async fn document_structure(&self, request: &DownloadRequest) -> DocumentStructure {
        let summary = match request.format {
            TargetFormat::DelimitedText => None,
            _ => match self.source.summary(&request.report).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::debug!(
                        export_id = request.id.0,
                        error = %e,
                        "report summary unavailable, titling document by report id"
                    );
                    None
                }
            },
        };

        DocumentStructure::from_summary(
            &request.report,
            summary.as_ref(),
            &self.config.document,
            request.user.clone(),
        )
    }
}

impl std::fmt::Debug for ReportExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportExporter")
            .field("config", &self.config)
            .field("accepting_new", &self.accepting_new.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Keep a file name safe for a `Content-Disposition` header and a filesystem
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').trim().to_string()
}

fn with_extension(name: String, format: TargetFormat) -> String {
    let extension = format.extension();
    let has_extension = name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(extension));
    if has_extension {
        name
    } else {
        format!("{name}.{extension}")
    }
}
