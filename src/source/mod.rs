//! Remote data sources
//!
//! The pipeline reads records through the [`DataSource`] trait. The exporter
//! receives one explicitly constructed `Arc<dyn DataSource>`:
//! [`HttpDataSource`] for a paged HTTP API, or [`SyntheticDataSource`] for
//! demos and tests.

mod http;
mod synthetic;

pub use http::HttpDataSource;
pub use synthetic::SyntheticDataSource;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::types::{FetchTask, Page, ReportSummary};

/// Paged access to report records
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch the records `[task.offset, task.offset + task.size)` of `report`
    async fn fetch_page(&self, report: &str, task: FetchTask) -> Result<Page, FetchError>;

    /// Describe `report`, including how many records it holds
    async fn summary(&self, report: &str) -> Result<ReportSummary, FetchError>;
}
