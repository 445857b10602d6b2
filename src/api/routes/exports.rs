//! Export handlers: streamed downloads, summaries, listing and cancellation.

use super::DownloadQuery;
use crate::api::AppState;
use crate::error::{Error, ValidationError};
use crate::types::{ExportId, ExportParams, TargetFormat};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, future, stream};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

/// Bytes buffered between the export sink and the response body
const STREAM_BUFFER: usize = 64 * 1024;

/// GET /download - Stream a report as a document
///
/// The export starts as soon as the request validates; the body carries the
/// document while it is being written. If the export fails midway the body
/// ends with an error, so the client sees a truncated transfer rather than a
/// short but seemingly complete file.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, Error> {
    let target = query.target.unwrap_or_else(|| "txt".to_string());
    // Reject bad input before asking the data source for a record count
    if query.report.trim().is_empty() {
        return Err(ValidationError::EmptyReport.into());
    }
    target.parse::<TargetFormat>()?;

    let records = match query.records {
        Some(records) => records,
        None => {
            state
                .exporter
                .resolve_record_count(query.report.trim())
                .await?
        }
    };

    let request = state.exporter.prepare(ExportParams {
        report: query.report,
        records,
        file_name: query.file_name,
        target,
        user: query.user,
    })?;

    let content_type = request.format.content_type();
    let disposition = format!("attachment; filename=\"{}\"", request.file_name);

    let (writer, reader) = tokio::io::duplex(STREAM_BUFFER);
    let (done_tx, done_rx) = oneshot::channel();
    let exporter = state.exporter.clone();
    tokio::spawn(async move {
        let _ = done_tx.send(exporter.export(request, writer).await);
    });

    let outcome = stream::once(async move {
        match done_rx.await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(Err(std::io::Error::other(e.to_string()))),
            Err(_) => Some(Err(std::io::Error::other(
                "export task ended without a result",
            ))),
        }
    })
    .filter_map(future::ready);
    let body = Body::from_stream(ReaderStream::new(reader).chain(outcome));

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// GET /reports/:report/summary - Report metadata
pub async fn report_summary(
    State(state): State<AppState>,
    Path(report): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let summary = state.exporter.summary(&report).await?;
    Ok(Json(summary))
}

/// GET /exports - Exports currently running
pub async fn list_exports(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.exporter.active_exports().await)
}

/// DELETE /exports/:id - Cancel a running export
pub async fn cancel_export(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, Error> {
    state.exporter.cancel_export(ExportId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
