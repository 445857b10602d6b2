//! Export sink: the single writer of an export's output stream
//!
//! [`ExportSink::process`] is the whole state machine. It is driven either by
//! [`ExportSink::run`] draining a bounded queue that [`QueueConsumer`] feeds
//! (the default), or directly by the draining worker through [`SharedSink`].

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{DocumentWriter, OutputStream};
use crate::error::{Error, ReassemblyError, Result, WriteError};
use crate::reassembly::ChunkConsumer;
use crate::types::{ExportId, ReadyChunk};

/// Counters shared between the sink and the progress reporter
#[derive(Debug, Default)]
pub struct ExportCounters {
    /// Data records written
    pub records_written: AtomicU64,
    /// Bytes written to the output stream
    pub bytes_written: AtomicU64,
}

/// Progress of one export as seen by its sink
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportState {
    /// Header emitted
    pub header_written: bool,
    /// Bytes written to the output stream
    pub bytes_written: u64,
    /// Chunks written
    pub chunks_written: u64,
    /// Data records written
    pub records_written: u64,
    /// Offset the next chunk must start at
    pub next_offset: u64,
    /// Closing structure written and stream shut down
    pub finished: bool,
    columns: usize,
}

/// Final accounting returned when the last chunk is written
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkReport {
    /// Data records written
    pub records: u64,
    /// Chunks written
    pub chunks: u64,
    /// Bytes written to the output stream
    pub bytes_written: u64,
}

/// Serializes ready chunks into the output stream
pub struct ExportSink {
    id: ExportId,
    total_records: u64,
    writer: Box<dyn DocumentWriter>,
    output: OutputStream,
    state: ExportState,
    counters: Arc<ExportCounters>,
    cancel: CancellationToken,
}

impl ExportSink {
    /// Create a sink writing `total_records` records through `writer` into `output`
    pub fn new(
        id: ExportId,
        total_records: u64,
        writer: Box<dyn DocumentWriter>,
        output: OutputStream,
        counters: Arc<ExportCounters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            total_records,
            writer,
            output,
            state: ExportState::default(),
            counters,
            cancel,
        }
    }

    /// Current state
    pub fn state(&self) -> &ExportState {
        &self.state
    }

    /// Write one chunk; returns the final report once the last chunk is written
    ///
    /// The chunk is fully validated before any byte is produced, so a rejected
    /// chunk leaves the output untouched.
    pub async fn process(&mut self, ready: ReadyChunk) -> Result<Option<SinkReport>> {
        let ReadyChunk { chunk, is_last } = ready;

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.state.finished {
            return Err(ReassemblyError::AfterFinalize {
                offset: chunk.offset,
            }
            .into());
        }
        if chunk.offset != self.state.next_offset {
            return Err(malformed(
                chunk.offset,
                format!("expected offset {}", self.state.next_offset),
            ));
        }
        if chunk.rows.is_empty() {
            return Err(ReassemblyError::EmptyChunk {
                offset: chunk.offset,
            }
            .into());
        }
        if chunk.columns.is_empty() {
            return Err(malformed(chunk.offset, "no columns".to_string()));
        }
        if self.state.header_written && chunk.columns.len() != self.state.columns {
            return Err(malformed(
                chunk.offset,
                format!(
                    "{} columns, header has {}",
                    chunk.columns.len(),
                    self.state.columns
                ),
            ));
        }
        if is_last != (chunk.end() >= self.total_records) {
            return Err(malformed(
                chunk.offset,
                format!("is_last={is_last} disagrees with end {}", chunk.end()),
            ));
        }
        let width = chunk.columns.len();
        if let Some((row, cells)) = chunk
            .rows
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != width)
        {
            return Err(WriteError::RowWidth {
                row,
                expected: width,
                actual: cells.len(),
            }
            .into());
        }

        let mut buf = Vec::new();
        if !self.state.header_written {
            self.writer.write_header(&chunk.columns, &mut buf)?;
            self.state.header_written = true;
            self.state.columns = width;
        }
        self.writer.write_rows(&chunk.rows, &mut buf)?;
        if is_last {
            self.writer.close(&mut buf)?;
        }

        self.output.write_all(&buf).await.map_err(WriteError::Io)?;
        self.output.flush().await.map_err(WriteError::Io)?;

        self.state.bytes_written += buf.len() as u64;
        self.state.records_written += chunk.size;
        self.state.chunks_written += 1;
        self.state.next_offset = chunk.end();
        self.counters
            .records_written
            .store(self.state.records_written, Ordering::Relaxed);
        self.counters
            .bytes_written
            .store(self.state.bytes_written, Ordering::Relaxed);

        tracing::debug!(
            export_id = self.id.0,
            offset = chunk.offset,
            size = chunk.size,
            bytes = buf.len(),
            is_last,
            "wrote chunk"
        );

        if !is_last {
            return Ok(None);
        }

        self.output.shutdown().await.map_err(WriteError::Io)?;
        self.state.finished = true;

        let report = SinkReport {
            records: self.state.records_written,
            chunks: self.state.chunks_written,
            bytes_written: self.state.bytes_written,
        };
        tracing::info!(
            export_id = self.id.0,
            records = report.records,
            chunks = report.chunks,
            bytes = report.bytes_written,
            "document finalized"
        );
        Ok(Some(report))
    }

    /// Drain `rx` until the last chunk is written
    ///
    /// Fails with [`ReassemblyError::Incomplete`] if every sender goes away
    /// before the last chunk arrives.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ReadyChunk>) -> Result<SinkReport> {
        loop {
            let ready = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                ready = rx.recv() => ready,
            };

            let Some(ready) = ready else {
                return Err(ReassemblyError::Incomplete {
                    delivered: self.state.records_written,
                    total: self.total_records,
                }
                .into());
            };

            if let Some(report) = self.process(ready).await? {
                return Ok(report);
            }
        }
    }
}

impl std::fmt::Debug for ExportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSink")
            .field("id", &self.id)
            .field("format", &self.writer.format())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn malformed(offset: u64, reason: String) -> Error {
    ReassemblyError::Malformed { offset, reason }.into()
}

/// Queue-mode consumer: hands ready chunks to the sink task
#[derive(Clone, Debug)]
pub struct QueueConsumer {
    tx: mpsc::Sender<ReadyChunk>,
}

impl QueueConsumer {
    /// Wrap the sending half of the sink queue
    pub fn new(tx: mpsc::Sender<ReadyChunk>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChunkConsumer for QueueConsumer {
    async fn deliver(&self, ready: ReadyChunk) -> Result<()> {
        self.tx
            .send(ready)
            .await
            .map_err(|_| ReassemblyError::SinkClosed.into())
    }
}

/// Inline-mode consumer: runs the sink on the delivering worker
///
/// The mutex keeps a single writer even though any worker may be the one
/// draining the buffer. The final report is sent once through `done`; if the
/// consumer is dropped first, the receiver observes a closed channel.
pub struct SharedSink {
    sink: Mutex<ExportSink>,
    done: Mutex<Option<oneshot::Sender<SinkReport>>>,
}

impl SharedSink {
    /// Wrap `sink`; the returned receiver resolves with the final report
    pub fn new(sink: ExportSink) -> (Self, oneshot::Receiver<SinkReport>) {
        let (tx, rx) = oneshot::channel();
        let shared = Self {
            sink: Mutex::new(sink),
            done: Mutex::new(Some(tx)),
        };
        (shared, rx)
    }
}

#[async_trait]
impl ChunkConsumer for SharedSink {
    async fn deliver(&self, ready: ReadyChunk) -> Result<()> {
        let mut sink = self.sink.lock().await;
        if let Some(report) = sink.process(ready).await? {
            if let Some(done) = self.done.lock().await.take() {
                let _ = done.send(report);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSink").finish_non_exhaustive()
    }
}
