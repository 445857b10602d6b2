//! Core types for report-stream

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ValidationError;

/// Unique identifier for an export run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportId(pub u64);

impl ExportId {
    /// Create a new ExportId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ExportId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ExportId> for u64 {
    fn from(id: ExportId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ExportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExportId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Destination document format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetFormat {
    /// Delimited text (tab-separated by default)
    DelimitedText,
    /// SpreadsheetML workbook
    Spreadsheet,
    /// Paginated PDF document
    PaginatedDocument,
}

impl TargetFormat {
    /// Canonical tag for this format
    pub fn tag(&self) -> &'static str {
        match self {
            TargetFormat::DelimitedText => "delimited-text",
            TargetFormat::Spreadsheet => "spreadsheet",
            TargetFormat::PaginatedDocument => "paginated-document",
        }
    }

    /// File extension used when no output name is given
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::DelimitedText => "txt",
            TargetFormat::Spreadsheet => "xls",
            TargetFormat::PaginatedDocument => "pdf",
        }
    }

    /// MIME type of the produced document
    pub fn content_type(&self) -> &'static str {
        match self {
            TargetFormat::DelimitedText => "text/plain; charset=utf-8",
            TargetFormat::Spreadsheet => "application/vnd.ms-excel",
            TargetFormat::PaginatedDocument => "application/pdf",
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for TargetFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "csv" | "tsv" | "text" | "delimited-text" => Ok(TargetFormat::DelimitedText),
            "xls" | "xlsx" | "xml" | "spreadsheet" => Ok(TargetFormat::Spreadsheet),
            "pdf" | "paginated-document" => Ok(TargetFormat::PaginatedDocument),
            _ => Err(ValidationError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A single tabular record, one rendered value per column
pub type Row = Vec<String>;

/// A page of rows as returned by a data source
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Column names, in display order
    pub columns: Vec<String>,
    /// Records in source order
    pub rows: Vec<Row>,
}

/// A non-overlapping slice of the dataset handed to one worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTask {
    /// Index of the first record
    pub offset: u64,
    /// Number of records
    pub size: u64,
}

impl FetchTask {
    /// Create a task covering `[offset, offset + size)`
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// One past the last record covered by this task
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A fetched page positioned within the dataset
#[derive(Clone, Debug, PartialEq)]
pub struct DataChunk {
    /// Index of the first record
    pub offset: u64,
    /// Number of records (always equal to `rows.len()`)
    pub size: u64,
    /// Column names
    pub columns: Vec<String>,
    /// Records
    pub rows: Vec<Row>,
}

impl DataChunk {
    /// Build a chunk for `task` from the page the source returned
    pub fn new(task: FetchTask, page: Page) -> Self {
        Self {
            offset: task.offset,
            size: page.rows.len() as u64,
            columns: page.columns,
            rows: page.rows,
        }
    }

    /// One past the last record in this chunk
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A chunk released by the reassembly buffer in offset order
#[derive(Clone, Debug, PartialEq)]
pub struct ReadyChunk {
    /// The chunk itself
    pub chunk: DataChunk,
    /// True for the chunk that reaches the end of the request
    pub is_last: bool,
}

/// A validated export request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DownloadRequest {
    /// Export run id
    pub id: ExportId,
    /// Report identifier passed to the data source
    pub report: String,
    /// Number of records to export
    pub total_records: u64,
    /// Destination format
    pub format: TargetFormat,
    /// File name presented to the client
    pub file_name: String,
    /// Requesting user, used only for document decoration
    pub user: Option<String>,
}

/// Raw trigger input, validated by [`crate::ReportExporter::prepare`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExportParams {
    /// Report identifier
    pub report: String,
    /// Number of records to export (must be at least 1)
    pub records: i64,
    /// Output file name (defaults to `<report>.<ext>`)
    #[serde(default)]
    pub file_name: Option<String>,
    /// Format tag (`txt`, `xls`, `pdf`, ...)
    pub target: String,
    /// Requesting user
    #[serde(default)]
    pub user: Option<String>,
}

/// Lifecycle state of a running export
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Not started
    Idle,
    /// Workers are fetching pages
    Fetching,
    /// All pages fetched, sink still writing
    Draining,
    /// Sink wrote the final chunk
    Completed,
    /// Aborted by an error, timeout or cancellation
    Failed,
}

/// Result of a successful export
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Export run id
    pub id: ExportId,
    /// File name presented to the client
    pub file_name: String,
    /// Destination format
    pub format: TargetFormat,
    /// Data records written
    pub records: u64,
    /// Chunks written
    pub chunks: u64,
    /// Total bytes written to the output stream
    pub bytes_written: u64,
    /// Wall time from start to completion
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

/// Snapshot of an export that is still running
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportInfo {
    /// Export run id
    pub id: ExportId,
    /// Report identifier
    pub report: String,
    /// File name presented to the client
    pub file_name: String,
    /// Destination format
    pub format: TargetFormat,
    /// Records requested
    pub total_records: u64,
    /// Records written so far
    pub records_written: u64,
    /// Bytes written so far
    pub bytes_written: u64,
}

/// Report metadata served by a data source
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Records available for the report
    pub total_records: u64,
    /// Display name
    #[serde(default)]
    pub report_name: String,
    /// Free-text description of the report filter
    #[serde(default)]
    pub criteria: String,
}

/// Event emitted during an export's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Export accepted and workers starting
    Started {
        /// Export ID
        id: ExportId,
        /// Report identifier
        report: String,
        /// Output file name
        file_name: String,
        /// Destination format
        format: TargetFormat,
        /// Records to export
        total_records: u64,
    },

    /// Periodic progress update
    Progress {
        /// Export ID
        id: ExportId,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Records written so far
        records_written: u64,
        /// Bytes written so far
        bytes_written: u64,
    },

    /// Export completed and the document is closed
    Succeeded {
        /// Export ID
        id: ExportId,
        /// Output file name
        file_name: String,
        /// Total bytes written
        bytes_written: u64,
    },

    /// Export failed
    Failed {
        /// Export ID
        id: ExportId,
        /// Output file name
        file_name: String,
        /// Error message
        error: String,
    },
}

impl Event {
    /// Export this event refers to
    pub fn export_id(&self) -> ExportId {
        match self {
            Event::Started { id, .. }
            | Event::Progress { id, .. }
            | Event::Succeeded { id, .. }
            | Event::Failed { id, .. } => *id,
        }
    }

    /// Short name used for SSE event types
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Started { .. } => "started",
            Event::Progress { .. } => "progress",
            Event::Succeeded { .. } => "succeeded",
            Event::Failed { .. } => "failed",
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_format_accepts_tags_and_aliases_case_insensitively() {
        let cases = [
            ("txt", TargetFormat::DelimitedText),
            ("CSV", TargetFormat::DelimitedText),
            ("delimited-text", TargetFormat::DelimitedText),
            ("xlsx", TargetFormat::Spreadsheet),
            ("Spreadsheet", TargetFormat::Spreadsheet),
            (" pdf ", TargetFormat::PaginatedDocument),
            ("paginated-document", TargetFormat::PaginatedDocument),
        ];

        for (tag, expected) in cases {
            assert_eq!(tag.parse::<TargetFormat>().unwrap(), expected, "tag {tag:?}");
        }
    }

    #[test]
    fn target_format_rejects_unknown_tag() {
        let err = "docx".parse::<TargetFormat>().unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat(ref t) if t == "docx"));
    }

    #[test]
    fn data_chunk_size_follows_row_count() {
        let page = Page {
            columns: vec!["a".into()],
            rows: vec![vec!["1".into()], vec!["2".into()]],
        };
        let chunk = DataChunk::new(FetchTask::new(10, 2), page);

        assert_eq!(chunk.offset, 10);
        assert_eq!(chunk.size, 2);
        assert_eq!(chunk.end(), 12);
    }

    #[test]
    fn event_serializes_with_snake_case_type_tag() {
        let event = Event::Succeeded {
            id: ExportId(7),
            file_name: "r.pdf".into(),
            bytes_written: 42,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "succeeded");
        assert_eq!(json["id"], 7);
        assert_eq!(event.kind(), "succeeded");
        assert_eq!(event.export_id(), ExportId(7));
    }
}
