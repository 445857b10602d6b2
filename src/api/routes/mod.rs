//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`exports`] - Downloads, summaries and export control
//! - [`system`] - Health and events

use serde::{Deserialize, Serialize};

mod exports;
mod system;

pub use exports::*;
pub use system::*;

/// Query parameters for GET /download
#[derive(Debug, Deserialize, Serialize)]
pub struct DownloadQuery {
    /// Report identifier
    #[serde(default)]
    pub report: String,
    /// Records to export (default: the report's total from its summary)
    pub records: Option<i64>,
    /// Output file name (default: `<report>.<ext>`)
    pub file_name: Option<String>,
    /// Target format tag (default: "txt")
    pub target: Option<String>,
    /// Requesting user, shown in document decoration
    pub user: Option<String>,
}
