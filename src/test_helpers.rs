//! Shared fixtures for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

use crate::config::{Config, DeliveryMode};
use crate::error::FetchError;
use crate::source::{DataSource, SyntheticDataSource};
use crate::types::{FetchTask, Page, ReportSummary};

/// In-memory output that stays inspectable after the sink owns it
#[derive(Clone, Default)]
pub(crate) struct Capture {
    pub bytes: Arc<Mutex<Vec<u8>>>,
    pub shut_down: Arc<Mutex<bool>>,
}

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.lock().unwrap()
    }
}

impl AsyncWrite for Capture {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        *self.shut_down.lock().unwrap() = true;
        Poll::Ready(Ok(()))
    }
}

/// Synthetic source with per-offset delays and failures, recording every call
pub(crate) struct ScriptedSource {
    inner: SyntheticDataSource,
    delay: Duration,
    delays: HashMap<u64, Duration>,
    fail_at: Option<u64>,
    calls: Mutex<Vec<FetchTask>>,
}

impl ScriptedSource {
    pub fn new(total_records: u64) -> Self {
        Self {
            inner: SyntheticDataSource::new(total_records, 11),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            fail_at: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Delay every page
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay only the page starting at `offset`
    pub fn delay_at(mut self, offset: u64, delay: Duration) -> Self {
        self.delays.insert(offset, delay);
        self
    }

    /// Fail the page starting at `offset` with a 500
    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Tasks requested so far, sorted by offset
    pub fn calls(&self) -> Vec<FetchTask> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by_key(|t| t.offset);
        calls
    }

    pub fn synthetic(&self) -> &SyntheticDataSource {
        &self.inner
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch_page(&self, report: &str, task: FetchTask) -> Result<Page, FetchError> {
        self.calls.lock().unwrap().push(task);

        let delay = self.delays.get(&task.offset).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(task.offset) {
            return Err(FetchError::Status {
                offset: task.offset,
                status: 500,
            });
        }
        self.inner.fetch_page(report, task).await
    }

    async fn summary(&self, report: &str) -> Result<ReportSummary, FetchError> {
        self.inner.summary(report).await
    }
}

/// Config with `workers` workers, `initial` first-page size and `delivery` mode
pub(crate) fn test_config(workers: usize, initial: u64, delivery: DeliveryMode) -> Config {
    let mut config = Config::default();
    config.pipeline.workers = workers;
    config.pipeline.delivery = delivery;
    config.pipeline.progress_interval = Duration::from_millis(20);
    config.paging.initial_page_size = initial;
    config
}
