//! Fetch workers

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, FetchError, Result};
use crate::paging::FetchAllocator;
use crate::reassembly::ReassemblyBuffer;
use crate::retry::fetch_with_retry;
use crate::source::DataSource;
use crate::types::{DataChunk, ExportId};

/// State shared by every worker of one export
pub(crate) struct WorkerContext {
    pub id: ExportId,
    pub report: String,
    pub source: Arc<dyn DataSource>,
    pub allocator: FetchAllocator,
    pub buffer: ReassemblyBuffer,
    pub retry: RetryConfig,
    pub cancel: CancellationToken,
}

/// What one worker fetched before the range ran out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct WorkerStats {
    pub pages: u64,
    pub records: u64,
}

/// Claim tasks until the range is exhausted
///
/// Any error ends this worker; the coordinator turns it into a failed export
/// and stops the others.
pub(crate) async fn run_worker(worker: usize, ctx: Arc<WorkerContext>) -> Result<WorkerStats> {
    let mut stats = WorkerStats::default();

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(task) = ctx.allocator.next_task().await else {
            break;
        };

        let started = Instant::now();
        let page = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            page = fetch_with_retry(&ctx.retry, &ctx.cancel, || {
                ctx.source.fetch_page(&ctx.report, task)
            }) => page?,
        };
        let elapsed = started.elapsed();

        let actual = page.rows.len() as u64;
        if actual != task.size {
            return Err(FetchError::RowCountMismatch {
                offset: task.offset,
                expected: task.size,
                actual,
            }
            .into());
        }
        ctx.allocator.record_completion(task, elapsed).await;

        tracing::debug!(
            export_id = ctx.id.0,
            worker,
            offset = task.offset,
            size = task.size,
            elapsed_ms = elapsed.as_millis() as u64,
            "fetched page"
        );

        let chunk = DataChunk::new(task, page);
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            inserted = ctx.buffer.insert(chunk) => {
                inserted?;
            }
        }

        stats.pages += 1;
        stats.records += task.size;
    }

    tracing::debug!(
        export_id = ctx.id.0,
        worker,
        pages = stats.pages,
        records = stats.records,
        "worker finished"
    );
    Ok(stats)
}
