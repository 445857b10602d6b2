//! Out-of-order chunk reassembly
//!
//! Workers finish their fetches in any order. The [`ReassemblyBuffer`] stages
//! each chunk by offset and releases the contiguous run starting at the next
//! expected offset, so the consumer sees `0, s0, s0 + s1, ...` exactly once and
//! in order. Staging and delivery share one lock, so emission order always
//! equals offset order even when several workers drain concurrently.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ReassemblyError, Result};
use crate::types::{DataChunk, ReadyChunk};

/// Receiver of chunks released in offset order
#[async_trait]
pub trait ChunkConsumer: Send + Sync {
    /// Accept the next ready chunk
    ///
    /// Called with the buffer lock held; implementations must not call back
    /// into the buffer.
    async fn deliver(&self, ready: ReadyChunk) -> Result<()>;
}

#[derive(Debug, Default)]
struct BufferState {
    staging: BTreeMap<u64, DataChunk>,
    next_expected: u64,
    emitted: u64,
    last_emitted: bool,
    peak_depth: usize,
}

/// Stages out-of-order chunks and releases them in sequence
pub struct ReassemblyBuffer {
    total_records: u64,
    consumer: Arc<dyn ChunkConsumer>,
    state: Mutex<BufferState>,
}

impl ReassemblyBuffer {
    /// Create a buffer for a request of `total_records`, delivering to `consumer`
    pub fn new(total_records: u64, consumer: Arc<dyn ChunkConsumer>) -> Self {
        Self {
            total_records,
            consumer,
            state: Mutex::new(BufferState::default()),
        }
    }

    /// Stage `chunk` and deliver every chunk that became contiguous
    ///
    /// Returns the number of chunks delivered by this call.
    pub async fn insert(&self, chunk: DataChunk) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.check(&state, &chunk)?;

        tracing::debug!(
            offset = chunk.offset,
            size = chunk.size,
            next_expected = state.next_expected,
            "staging chunk"
        );
        state.staging.insert(chunk.offset, chunk);
        state.peak_depth = state.peak_depth.max(state.staging.len());

        let mut delivered = 0;
        loop {
            let next = state.next_expected;
            let Some(chunk) = state.staging.remove(&next) else {
                break;
            };

            state.next_expected = chunk.end();
            let is_last = chunk.end() >= self.total_records;
            if is_last {
                state.last_emitted = true;
            }
            state.emitted += 1;

            tracing::trace!(
                seq = state.emitted,
                offset = chunk.offset,
                size = chunk.size,
                is_last,
                "releasing chunk"
            );
            self.consumer.deliver(ReadyChunk { chunk, is_last }).await?;
            delivered += 1;

            if is_last {
                break;
            }
        }

        Ok(delivered)
    }

    fn check(
        &self,
        state: &BufferState,
        chunk: &DataChunk,
    ) -> std::result::Result<(), ReassemblyError> {
        let offset = chunk.offset;

        if state.last_emitted {
            return Err(ReassemblyError::AfterLast { offset });
        }
        if chunk.size == 0 || chunk.rows.is_empty() {
            return Err(ReassemblyError::EmptyChunk { offset });
        }
        if chunk.rows.len() as u64 != chunk.size {
            return Err(ReassemblyError::Malformed {
                offset,
                reason: format!("size {} but {} rows", chunk.size, chunk.rows.len()),
            });
        }
        if offset < state.next_expected {
            return Err(ReassemblyError::Overlap {
                offset,
                expected: state.next_expected,
            });
        }
        if chunk.end() > self.total_records {
            return Err(ReassemblyError::OutOfRange {
                offset,
                end: chunk.end(),
                total: self.total_records,
            });
        }
        if state.staging.contains_key(&offset) {
            return Err(ReassemblyError::Duplicate { offset });
        }

        // Neighbours already staged must not intersect the new range
        if let Some((_, before)) = state.staging.range(..offset).next_back() {
            if before.end() > offset {
                return Err(ReassemblyError::Overlap {
                    offset,
                    expected: before.end(),
                });
            }
        }
        if let Some((&after, _)) = state.staging.range(offset..).next() {
            if after < chunk.end() {
                return Err(ReassemblyError::Overlap {
                    offset,
                    expected: after,
                });
            }
        }

        Ok(())
    }

    /// Offset the buffer will release next
    pub async fn next_expected(&self) -> u64 {
        self.state.lock().await.next_expected
    }

    /// Chunks waiting for a predecessor
    pub async fn staged(&self) -> usize {
        self.state.lock().await.staging.len()
    }

    /// Largest number of chunks staged at once
    pub async fn peak_depth(&self) -> usize {
        self.state.lock().await.peak_depth
    }

    /// Whether the final chunk has been released
    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.last_emitted
    }
}

impl std::fmt::Debug for ReassemblyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReassemblyBuffer")
            .field("total_records", &self.total_records)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::{FetchTask, Page};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u64, u64, bool)>>,
    }

    #[async_trait]
    impl ChunkConsumer for Recorder {
        async fn deliver(&self, ready: ReadyChunk) -> Result<()> {
            self.seen
                .lock()
                .await
                .push((ready.chunk.offset, ready.chunk.size, ready.is_last));
            Ok(())
        }
    }

    fn chunk(offset: u64, size: u64) -> DataChunk {
        let rows = (offset..offset + size).map(|i| vec![i.to_string()]).collect();
        DataChunk::new(
            FetchTask::new(offset, size),
            Page {
                columns: vec!["id".into()],
                rows,
            },
        )
    }

    fn buffer(total: u64) -> (ReassemblyBuffer, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (ReassemblyBuffer::new(total, recorder.clone()), recorder)
    }

    fn reassembly_err(result: Result<usize>) -> ReassemblyError {
        match result {
            Err(Error::Reassembly(e)) => e,
            other => panic!("expected reassembly error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_order_arrivals_are_released_in_order() {
        let (buf, rec) = buffer(250);

        assert_eq!(buf.insert(chunk(200, 50)).await.unwrap(), 0);
        assert_eq!(buf.insert(chunk(100, 100)).await.unwrap(), 0);
        assert_eq!(buf.staged().await, 2);
        assert_eq!(buf.insert(chunk(0, 100)).await.unwrap(), 3);

        let seen = rec.seen.lock().await.clone();
        assert_eq!(seen, vec![(0, 100, false), (100, 100, false), (200, 50, true)]);
        assert!(buf.is_complete().await);
        assert_eq!(buf.staged().await, 0);
        assert_eq!(buf.peak_depth().await, 3);
    }

    #[tokio::test]
    async fn single_chunk_covering_request_is_last() {
        let (buf, rec) = buffer(50);

        assert_eq!(buf.insert(chunk(0, 50)).await.unwrap(), 1);
        assert_eq!(rec.seen.lock().await.clone(), vec![(0, 50, true)]);
    }

    #[tokio::test]
    async fn duplicate_offset_is_rejected() {
        let (buf, _) = buffer(300);
        buf.insert(chunk(100, 100)).await.unwrap();

        let err = reassembly_err(buf.insert(chunk(100, 100)).await);
        assert_eq!(err, ReassemblyError::Duplicate { offset: 100 });
    }

    #[tokio::test]
    async fn chunk_below_next_expected_is_an_overlap() {
        let (buf, _) = buffer(300);
        buf.insert(chunk(0, 100)).await.unwrap();

        let err = reassembly_err(buf.insert(chunk(50, 10)).await);
        assert_eq!(
            err,
            ReassemblyError::Overlap {
                offset: 50,
                expected: 100
            }
        );
    }

    #[tokio::test]
    async fn chunk_intersecting_a_staged_neighbour_is_an_overlap() {
        let (buf, _) = buffer(300);
        buf.insert(chunk(100, 100)).await.unwrap();

        let err = reassembly_err(buf.insert(chunk(150, 100)).await);
        assert!(matches!(err, ReassemblyError::Overlap { offset: 150, .. }));

        let err = reassembly_err(buf.insert(chunk(50, 60)).await);
        assert!(matches!(err, ReassemblyError::Overlap { offset: 50, .. }));
    }

    #[tokio::test]
    async fn chunk_past_total_is_out_of_range() {
        let (buf, _) = buffer(100);

        let err = reassembly_err(buf.insert(chunk(50, 60)).await);
        assert_eq!(
            err,
            ReassemblyError::OutOfRange {
                offset: 50,
                end: 110,
                total: 100
            }
        );
    }

    #[tokio::test]
    async fn empty_chunk_is_rejected() {
        let (buf, _) = buffer(100);
        let empty = DataChunk::new(FetchTask::new(0, 10), Page::default());

        let err = reassembly_err(buf.insert(empty).await);
        assert_eq!(err, ReassemblyError::EmptyChunk { offset: 0 });
    }

    #[tokio::test]
    async fn nothing_is_accepted_after_the_last_chunk() {
        let (buf, _) = buffer(10);
        buf.insert(chunk(0, 10)).await.unwrap();

        let err = reassembly_err(buf.insert(chunk(10, 5)).await);
        assert_eq!(err, ReassemblyError::AfterLast { offset: 10 });
    }

    #[tokio::test]
    async fn concurrent_inserts_deliver_a_contiguous_sequence() {
        let total = 1_000;
        let (buf, rec) = buffer(total);
        let buf = Arc::new(buf);

        let mut handles = Vec::new();
        for offset in (0..total / 50).rev().map(|i| i * 50) {
            let buf = buf.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(offset % 7)).await;
                buf.insert(chunk(offset, 50)).await
            }));
        }
        let mut delivered = 0;
        for handle in handles {
            delivered += handle.await.unwrap().unwrap();
        }

        let seen = rec.seen.lock().await.clone();
        assert_eq!(delivered, 20);
        let offsets: Vec<u64> = seen.iter().map(|s| s.0).collect();
        assert_eq!(offsets, (0..total).step_by(50).collect::<Vec<_>>());
        assert_eq!(seen.iter().filter(|s| s.2).count(), 1);
        assert!(seen.last().unwrap().2);
    }
}
