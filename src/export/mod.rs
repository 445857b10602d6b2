//! Incremental document export
//!
//! A [`DocumentWriter`] turns a header, batches of rows and a final close call
//! into the bytes of one document. Writers append to a caller-owned buffer and
//! never touch the output stream; the [`ExportSink`] forwards those bytes,
//! so every format streams with the same flush and byte-accounting logic.
//!
//! | Format | Writer | Content type |
//! |--------|--------|--------------|
//! | delimited text | [`DelimitedWriter`] | `text/plain` |
//! | SpreadsheetML 2003 | [`SpreadsheetWriter`] | `application/vnd.ms-excel` |
//! | PDF 1.4 | [`PdfWriter`] | `application/pdf` |

pub mod delimited;
pub mod document;
pub mod sink;
pub mod spreadsheet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DocumentConfig;
use crate::error::WriteError;
use crate::types::{ReportSummary, Row, TargetFormat};

pub use delimited::DelimitedWriter;
pub use document::PdfWriter;
pub use sink::{ExportCounters, ExportSink, ExportState, QueueConsumer, SharedSink, SinkReport};
pub use spreadsheet::SpreadsheetWriter;

/// Output stream an export writes to
pub type OutputStream = Box<dyn tokio::io::AsyncWrite + Unpin + Send>;

/// Format-specific serializer driven by the export sink
///
/// Calls arrive as `write_header`, then any number of `write_rows`, then
/// `close`. Anything else is a [`WriteError::InvalidState`].
pub trait DocumentWriter: Send {
    /// Format produced by this writer
    fn format(&self) -> TargetFormat;

    /// MIME type of the produced document
    fn content_type(&self) -> &'static str {
        self.format().content_type()
    }

    /// File extension of the produced document
    fn extension(&self) -> &'static str {
        self.format().extension()
    }

    /// Emit the document preamble and column header
    fn write_header(&mut self, columns: &[String], out: &mut Vec<u8>) -> Result<(), WriteError>;

    /// Emit data rows
    fn write_rows(&mut self, rows: &[Row], out: &mut Vec<u8>) -> Result<(), WriteError>;

    /// Emit the closing structure; no further calls are accepted
    fn close(&mut self, out: &mut Vec<u8>) -> Result<(), WriteError>;
}

/// Decoration shared by all document formats
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentStructure {
    /// Report display name
    pub report_name: String,
    /// Organization shown next to the report name
    pub business_name: Option<String>,
    /// Copyright line for page footers
    pub copyright: Option<String>,
    /// When the export started
    pub generated_at: DateTime<Utc>,
    /// Requesting user
    pub user: Option<String>,
    /// Filter description, one bullet per entry
    pub criteria: Vec<String>,
}

impl DocumentStructure {
    /// Structure with only a report name, stamped now
    pub fn new(report_name: impl Into<String>) -> Self {
        Self {
            report_name: report_name.into(),
            business_name: None,
            copyright: None,
            generated_at: Utc::now(),
            user: None,
            criteria: Vec::new(),
        }
    }

    /// Build the decoration for `report` from its summary and document settings
    ///
    /// Criteria text is split into one bullet per non-empty line.
    pub fn from_summary(
        report: &str,
        summary: Option<&ReportSummary>,
        config: &DocumentConfig,
        user: Option<String>,
    ) -> Self {
        let report_name = summary
            .map(|s| s.report_name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(report)
            .to_string();
        let criteria = summary
            .map(|s| {
                s.criteria
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            report_name,
            business_name: config.business_name.clone(),
            copyright: config.copyright.clone(),
            generated_at: Utc::now(),
            user,
            criteria,
        }
    }

    /// "Business - Report", or just the report name
    pub fn title(&self) -> String {
        match self.business_name.as_deref() {
            Some(business) if !business.trim().is_empty() => {
                format!("{} - {}", business.trim(), self.report_name)
            }
            _ => self.report_name.clone(),
        }
    }
}

/// Create the writer for `format`
pub fn writer_for(
    format: TargetFormat,
    config: &DocumentConfig,
    structure: DocumentStructure,
) -> Box<dyn DocumentWriter> {
    match format {
        TargetFormat::DelimitedText => {
            // `Config::validate` only admits ASCII delimiters
            let delimiter = u8::try_from(config.delimiter).unwrap_or(b'\t');
            Box::new(DelimitedWriter::new(delimiter))
        }
        TargetFormat::Spreadsheet => {
            Box::new(SpreadsheetWriter::new(structure, config.max_rows_per_sheet))
        }
        TargetFormat::PaginatedDocument => {
            Box::new(PdfWriter::new(structure, config.rows_per_page))
        }
    }
}

/// Turn a column key into a display heading
///
/// `employeeId`, `employee_id` and `EMPLOYEE ID` all become `Employee Id`.
pub fn title_case(column: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in column.chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether a rendered cell holds a plain number
pub(crate) fn is_numeric(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed.len() == value.len()
        && trimmed.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

/// Shared call-order guard for writers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum WriterPhase {
    #[default]
    Fresh,
    Open,
    Closed,
}

impl WriterPhase {
    pub(crate) fn begin(&mut self, format: &'static str) -> Result<(), WriteError> {
        match self {
            WriterPhase::Fresh => {
                *self = WriterPhase::Open;
                Ok(())
            }
            WriterPhase::Open => Err(WriteError::InvalidState {
                format,
                reason: "header already written".into(),
            }),
            WriterPhase::Closed => Err(WriteError::InvalidState {
                format,
                reason: "document already closed".into(),
            }),
        }
    }

    pub(crate) fn require_open(&self, format: &'static str) -> Result<(), WriteError> {
        match self {
            WriterPhase::Open => Ok(()),
            WriterPhase::Fresh => Err(WriteError::InvalidState {
                format,
                reason: "header not written yet".into(),
            }),
            WriterPhase::Closed => Err(WriteError::InvalidState {
                format,
                reason: "document already closed".into(),
            }),
        }
    }

    pub(crate) fn finish(&mut self, format: &'static str) -> Result<(), WriteError> {
        self.require_open(format)?;
        *self = WriterPhase::Closed;
        Ok(())
    }
}
