//! Configuration types for report-stream

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::error::{Error, Result};

/// Adaptive paging settings
///
/// Drives the page-size estimator: pages grow when fetches return faster than
/// `latency_threshold` and shrink when they return slower.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PagingConfig {
    /// Target fetch latency (default: 30 seconds)
    #[serde(default = "default_latency_threshold", with = "duration_serde")]
    pub latency_threshold: Duration,

    /// Page size used before any fetch has completed (default: 100)
    #[serde(default = "default_initial_page_size")]
    pub initial_page_size: u64,

    /// Hard cap on page size (default: 1000)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            latency_threshold: default_latency_threshold(),
            initial_page_size: default_initial_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// How ready chunks reach the export sink
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Bounded queue drained by a dedicated sink task
    #[default]
    Queue,
    /// Sink invoked directly by whichever worker drains the buffer
    Inline,
}

/// Worker pool and lifecycle settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of parallel fetch workers (default: 5)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Largest record count a single export may request (default: i32::MAX)
    #[serde(default = "default_max_records")]
    pub max_records: u64,

    /// Global deadline for one export (default: 3 hours)
    #[serde(default = "default_export_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Ready-chunk delivery mode (default: queue)
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Interval between progress events (default: 5 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_records: default_max_records(),
            timeout: default_export_timeout(),
            delivery: DeliveryMode::default(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Retry policy for page fetches
///
/// Disabled by default: a failed fetch aborts the export. When `max_retries`
/// is raised, only transient failures are retried.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries per page (default: 0)
    #[serde(default)]
    pub max_retries: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Remote data source endpoints
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the data API (default: "http://localhost:8008/api/")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the paged data endpoint, relative to `base_url`
    #[serde(default = "default_data_path")]
    pub data_path: String,

    /// Path of the report summary endpoint, relative to `base_url`
    #[serde(default = "default_summary_path")]
    pub summary_path: String,

    /// Per-request timeout (default: 5 minutes)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            data_path: default_data_path(),
            summary_path: default_summary_path(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Document decoration and layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Organization shown in document titles
    #[serde(default)]
    pub business_name: Option<String>,

    /// Copyright line shown in page footers
    #[serde(default)]
    pub copyright: Option<String>,

    /// Field delimiter for delimited text (default: tab)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Data rows per worksheet before rolling over (default: 1,048,575)
    #[serde(default = "default_max_rows_per_sheet")]
    pub max_rows_per_sheet: u64,

    /// Data rows per document page (default: 40)
    #[serde(default = "default_rows_per_page")]
    pub rows_per_page: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            business_name: None,
            copyright: None,
            delimiter: default_delimiter(),
            max_rows_per_sheet: default_max_rows_per_sheet(),
            rows_per_page: default_rows_per_page(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration for ReportExporter
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Adaptive paging
    #[serde(default)]
    pub paging: PagingConfig,

    /// Worker pool and lifecycle
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Fetch retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Remote data source
    #[serde(default)]
    pub source: SourceConfig,

    /// Document layout
    #[serde(default)]
    pub document: DocumentConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            return Err(Error::config("pipeline.workers", "at least one worker is required"));
        }
        if self.pipeline.max_records == 0 {
            return Err(Error::config("pipeline.max_records", "must be at least 1"));
        }
        if self.pipeline.timeout.is_zero() {
            return Err(Error::config("pipeline.timeout", "must be greater than zero"));
        }
        if self.pipeline.progress_interval.is_zero() {
            return Err(Error::config(
                "pipeline.progress_interval",
                "must be greater than zero",
            ));
        }
        if self.paging.initial_page_size == 0 {
            return Err(Error::config("paging.initial_page_size", "must be at least 1"));
        }
        if self.paging.max_page_size < self.paging.initial_page_size {
            return Err(Error::config(
                "paging.max_page_size",
                format!(
                    "must not be smaller than initial_page_size ({})",
                    self.paging.initial_page_size
                ),
            ));
        }
        if self.paging.latency_threshold.is_zero() {
            return Err(Error::config(
                "paging.latency_threshold",
                "must be greater than zero",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config("retry.backoff_multiplier", "must be a finite number >= 1.0"));
        }
        if self.document.rows_per_page == 0 {
            return Err(Error::config("document.rows_per_page", "must be at least 1"));
        }
        if self.document.max_rows_per_sheet == 0 {
            return Err(Error::config("document.max_rows_per_sheet", "must be at least 1"));
        }
        if matches!(self.document.delimiter, '"' | '\r' | '\n') {
            return Err(Error::config(
                "document.delimiter",
                "quote and line breaks cannot be used as delimiters",
            ));
        }
        if !self.document.delimiter.is_ascii() {
            return Err(Error::config("document.delimiter", "must be an ASCII character"));
        }
        Ok(())
    }
}

// Default value functions
fn default_latency_threshold() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_page_size() -> u64 {
    100
}

fn default_max_page_size() -> u64 {
    1000
}

fn default_workers() -> usize {
    5
}

fn default_max_records() -> u64 {
    i32::MAX as u64
}

fn default_export_timeout() -> Duration {
    Duration::from_secs(3 * 60 * 60)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_base_url() -> String {
    "http://localhost:8008/api/".to_string()
}

fn default_data_path() -> String {
    "dataStream/dataTable".to_string()
}

fn default_summary_path() -> String {
    "dataStream/summary".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_delimiter() -> char {
    '\t'
}

fn default_max_rows_per_sheet() -> u64 {
    1_048_575
}

fn default_rows_per_page() -> usize {
    40
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "invalid duration: {secs} seconds"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
