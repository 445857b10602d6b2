//! Application state for the API server

use crate::ReportExporter;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The exporter serving every request
    pub exporter: Arc<ReportExporter>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(exporter: Arc<ReportExporter>) -> Self {
        Self { exporter }
    }
}
