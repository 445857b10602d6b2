//! Runs one export from first fetch to closed document

use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressReporterParams, spawn_progress_reporter};
use super::worker::{WorkerContext, run_worker};
use crate::config::{Config, DeliveryMode};
use crate::error::{Error, ReassemblyError, Result};
use crate::export::{
    DocumentWriter, ExportCounters, ExportSink, OutputStream, QueueConsumer, SharedSink,
    SinkReport,
};
use crate::paging::{FetchAllocator, PageSizeEstimator};
use crate::reassembly::{ChunkConsumer, ReassemblyBuffer};
use crate::source::DataSource;
use crate::types::{DownloadRequest, Event, ExportSummary, PipelineState};

/// Everything one export run needs
pub(crate) struct ExportRun {
    pub request: DownloadRequest,
    pub config: Arc<Config>,
    pub source: Arc<dyn DataSource>,
    pub writer: Box<dyn DocumentWriter>,
    pub output: OutputStream,
    pub event_tx: broadcast::Sender<Event>,
    /// Per-export token, child of `shutdown`
    pub cancel: CancellationToken,
    /// Exporter root token
    pub shutdown: CancellationToken,
    pub counters: Arc<ExportCounters>,
}

/// The sink side of a run, wired for the configured delivery mode
struct SinkHandle {
    consumer: Arc<dyn ChunkConsumer>,
    completion: BoxFuture<'static, Result<SinkReport>>,
    task: Option<AbortHandle>,
}

fn start_sink(
    sink: ExportSink,
    delivery: DeliveryMode,
    capacity: usize,
    total_records: u64,
    counters: Arc<ExportCounters>,
) -> SinkHandle {
    match delivery {
        DeliveryMode::Queue => {
            let (tx, rx) = mpsc::channel(capacity);
            let handle = tokio::spawn(sink.run(rx));
            let task = handle.abort_handle();
            let completion = async move {
                handle
                    .await
                    .map_err(|e| Error::Other(format!("export sink task failed: {e}")))?
            }
            .boxed();
            SinkHandle {
                consumer: Arc::new(QueueConsumer::new(tx)),
                completion,
                task: Some(task),
            }
        }
        DeliveryMode::Inline => {
            let (shared, done) = SharedSink::new(sink);
            // The sender lives inside the buffer; it is dropped unsent only if
            // every worker exits before the last chunk is written.
            let completion = async move {
                done.await.map_err(|_| {
                    ReassemblyError::Incomplete {
                        delivered: counters.records_written.load(Ordering::Relaxed),
                        total: total_records,
                    }
                    .into()
                })
            }
            .boxed();
            SinkHandle {
                consumer: Arc::new(shared),
                completion,
                task: None,
            }
        }
    }
}

/// Drive one export to completion or failure
///
/// Emits `Started` before any worker runs and exactly one of `Succeeded` or
/// `Failed` at the end. On failure the export token is cancelled, every
/// worker is stopped and the sink task is aborted before returning. Dropping
/// the future cancels the export token.
pub(crate) async fn run_export(run: ExportRun) -> Result<ExportSummary> {
    let ExportRun {
        request,
        config,
        source,
        writer,
        output,
        event_tx,
        cancel,
        shutdown,
        counters,
    } = run;

    // Stops workers, sink and progress if the caller drops this future
    let cancel_on_drop = cancel.clone().drop_guard();

    let started = Instant::now();
    let id = request.id;
    let total = request.total_records;
    let worker_count = config.pipeline.workers;

    tracing::info!(
        export_id = id.0,
        report = %request.report,
        format = %request.format,
        total_records = total,
        workers = worker_count,
        delivery = ?config.pipeline.delivery,
        "export started"
    );
    event_tx
        .send(Event::Started {
            id,
            report: request.report.clone(),
            file_name: request.file_name.clone(),
            format: request.format,
            total_records: total,
        })
        .ok();

    let progress_cancel = cancel.child_token();
    let progress = spawn_progress_reporter(ProgressReporterParams {
        id,
        total_records: total,
        counters: counters.clone(),
        event_tx: event_tx.clone(),
        interval: config.pipeline.progress_interval,
        cancel_token: progress_cancel.clone(),
    });

    let sink = ExportSink::new(id, total, writer, output, counters.clone(), cancel.clone());
    let SinkHandle {
        consumer,
        mut completion,
        task: sink_task,
    } = start_sink(
        sink,
        config.pipeline.delivery,
        worker_count,
        total,
        counters.clone(),
    );

    let ctx = Arc::new(WorkerContext {
        id,
        report: request.report.clone(),
        source,
        allocator: FetchAllocator::new(total, PageSizeEstimator::new(&config.paging)),
        buffer: ReassemblyBuffer::new(total, consumer),
        retry: config.retry.clone(),
        cancel: cancel.clone(),
    });

    let mut workers = JoinSet::new();
    for worker in 0..worker_count {
        workers.spawn(run_worker(worker, ctx.clone()));
    }
    // Workers hold the only remaining references, so the sink queue closes
    // once they are all gone.
    drop(ctx);

    let timeout = tokio::time::sleep(config.pipeline.timeout);
    tokio::pin!(timeout);
    let mut state = PipelineState::Fetching;
    let mut sink_pending = true;
    // A sink that ran dry because the workers died; their error is the cause
    let mut starved: Option<Error> = None;

    let outcome: Result<SinkReport> = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break Err(cancellation_error(&shutdown));
            }
            _ = &mut timeout => {
                break Err(Error::Timeout(config.pipeline.timeout));
            }
            report = &mut completion, if sink_pending => match report {
                Ok(report) => break Ok(report),
                Err(e) if state == PipelineState::Fetching && is_incomplete(&e) => {
                    sink_pending = false;
                    starved = Some(e);
                }
                Err(e) => break Err(e),
            },
            joined = workers.join_next(), if state == PipelineState::Fetching => match joined {
                None => {
                    state = PipelineState::Draining;
                    if let Some(e) = starved.take() {
                        break Err(e);
                    }
                    tracing::debug!(export_id = id.0, "all pages fetched, draining");
                }
                Some(Ok(Ok(_))) => {}
                Some(Ok(Err(Error::Cancelled))) => {
                    break Err(cancellation_error(&shutdown));
                }
                // The sink's own error explains a closed queue
                Some(Ok(Err(e))) if sink_pending && is_sink_closed(&e) => {}
                Some(Ok(Err(e))) => break Err(e),
                Some(Err(e)) => break Err(Error::Other(format!("fetch worker failed: {e}"))),
            },
        }
    };

    progress_cancel.cancel();

    match outcome {
        Ok(report) => {
            workers.shutdown().await;
            let _ = progress.await;
            let _ = cancel_on_drop.disarm();

            let summary = ExportSummary {
                id,
                file_name: request.file_name.clone(),
                format: request.format,
                records: report.records,
                chunks: report.chunks,
                bytes_written: report.bytes_written,
                elapsed: started.elapsed(),
            };
            tracing::info!(
                export_id = id.0,
                records = summary.records,
                chunks = summary.chunks,
                bytes = summary.bytes_written,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                state = ?PipelineState::Completed,
                "export completed"
            );
            event_tx
                .send(Event::Succeeded {
                    id,
                    file_name: request.file_name,
                    bytes_written: report.bytes_written,
                })
                .ok();
            Ok(summary)
        }
        Err(e) => {
            cancel.cancel();
            workers.shutdown().await;
            if let Some(task) = sink_task {
                task.abort();
            }
            let _ = progress.await;

            match &e {
                Error::Cancelled | Error::ShuttingDown => {
                    tracing::warn!(export_id = id.0, error = %e, "export stopped")
                }
                _ => tracing::error!(
                    export_id = id.0,
                    error = %e,
                    records_written = counters.records_written.load(Ordering::Relaxed),
                    state = ?PipelineState::Failed,
                    "export failed"
                ),
            }
            event_tx
                .send(Event::Failed {
                    id,
                    file_name: request.file_name,
                    error: e.to_string(),
                })
                .ok();
            Err(e)
        }
    }
}

fn is_incomplete(e: &Error) -> bool {
    matches!(e, Error::Reassembly(ReassemblyError::Incomplete { .. }))
}

fn is_sink_closed(e: &Error) -> bool {
    matches!(e, Error::Reassembly(ReassemblyError::SinkClosed))
}

fn cancellation_error(shutdown: &CancellationToken) -> Error {
    if shutdown.is_cancelled() {
        Error::ShuttingDown
    } else {
        Error::Cancelled
    }
}
