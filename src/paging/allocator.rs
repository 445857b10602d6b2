//! Fetch task allocation

use std::time::Duration;
use tokio::sync::Mutex;

use super::estimator::PageSizeEstimator;
use crate::types::FetchTask;

#[derive(Debug, Default)]
struct AllocatorState {
    next_offset: u64,
    last_page_size: Option<u64>,
    last_duration: Option<Duration>,
    issued: u64,
}

/// Hands out non-overlapping fetch tasks in increasing offset order
///
/// Every call to [`next_task`](Self::next_task) happens under one lock, so
/// concurrent workers never receive the same offset and the issued tasks
/// partition `[0, total_records)` without gaps.
#[derive(Debug)]
pub struct FetchAllocator {
    total_records: u64,
    estimator: PageSizeEstimator,
    state: Mutex<AllocatorState>,
}

impl FetchAllocator {
    /// Create an allocator for a request of `total_records`
    pub fn new(total_records: u64, estimator: PageSizeEstimator) -> Self {
        Self {
            total_records,
            estimator,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Records covered by this allocator
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Claim the next task, or `None` once the whole range has been issued
    pub async fn next_task(&self) -> Option<FetchTask> {
        let mut state = self.state.lock().await;

        if state.next_offset >= self.total_records {
            return None;
        }

        let remaining = self.total_records - state.next_offset;
        let size = self
            .estimator
            .next_page_size(self.total_records, state.last_page_size, state.last_duration)
            .min(remaining);

        let task = FetchTask::new(state.next_offset, size);
        state.next_offset = task.end();
        state.issued += 1;

        tracing::trace!(offset = task.offset, size = task.size, "allocated fetch task");
        Some(task)
    }

    /// Feed the latency of a completed fetch back into the estimator
    pub async fn record_completion(&self, task: FetchTask, duration: Duration) {
        let mut state = self.state.lock().await;
        state.last_page_size = Some(task.size);
        state.last_duration = Some(duration);
    }

    /// Number of tasks issued so far
    pub async fn issued(&self) -> u64 {
        self.state.lock().await.issued
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PagingConfig;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn allocator(total: u64) -> FetchAllocator {
        FetchAllocator::new(total, PageSizeEstimator::new(&PagingConfig::default()))
    }

    #[tokio::test]
    async fn three_tasks_for_250_records() {
        let alloc = allocator(250);

        // Three workers claim before any fetch completes
        let tasks = vec![
            alloc.next_task().await.unwrap(),
            alloc.next_task().await.unwrap(),
            alloc.next_task().await.unwrap(),
        ];

        assert_eq!(
            tasks,
            vec![
                FetchTask::new(0, 100),
                FetchTask::new(100, 100),
                FetchTask::new(200, 50),
            ]
        );
        assert_eq!(alloc.next_task().await, None);
        assert_eq!(alloc.issued().await, 3);
    }

    #[tokio::test]
    async fn small_request_is_a_single_task() {
        let alloc = allocator(50);

        assert_eq!(alloc.next_task().await, Some(FetchTask::new(0, 50)));
        assert_eq!(alloc.next_task().await, None);
    }

    #[tokio::test]
    async fn completion_feedback_resizes_following_tasks() {
        let alloc = allocator(10_000);

        let first = alloc.next_task().await.unwrap();
        alloc.record_completion(first, Duration::from_secs(15)).await;
        let second = alloc.next_task().await.unwrap();

        assert_eq!(second.offset, 100);
        assert_eq!(second.size, 200);
    }

    #[tokio::test]
    async fn concurrent_claims_partition_the_range() {
        let total = 12_345;
        let alloc = Arc::new(allocator(total));
        let mut handles = Vec::new();

        for worker in 0..8u64 {
            let alloc = alloc.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = alloc.next_task().await {
                    let millis = 1 + (task.offset + worker) % 40;
                    alloc.record_completion(task, Duration::from_millis(millis)).await;
                    claimed.push(task);
                }
                claimed
            }));
        }

        let mut tasks = Vec::new();
        for handle in handles {
            tasks.extend(handle.await.unwrap());
        }
        tasks.sort_by_key(|t| t.offset);

        let offsets: HashSet<u64> = tasks.iter().map(|t| t.offset).collect();
        assert_eq!(offsets.len(), tasks.len(), "no offset issued twice");

        let mut expected = 0;
        for task in &tasks {
            assert_eq!(task.offset, expected, "gap or overlap at {expected}");
            assert!(task.size >= 1);
            expected = task.end();
        }
        assert_eq!(expected, total);
    }
}
