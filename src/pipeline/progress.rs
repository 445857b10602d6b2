//! Periodic progress events

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::export::ExportCounters;
use crate::types::{Event, ExportId};

/// Parameters for spawning a progress reporter background task
pub(crate) struct ProgressReporterParams {
    /// Export ID
    pub id: ExportId,
    /// Records requested
    pub total_records: u64,
    /// Counters maintained by the sink
    pub counters: Arc<ExportCounters>,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
    /// Time between events
    pub interval: Duration,
    /// Stops the reporter
    pub cancel_token: CancellationToken,
}

/// Spawn a background task that periodically reports export progress
pub(crate) fn spawn_progress_reporter(
    params: ProgressReporterParams,
) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        id,
        total_records,
        counters,
        event_tx,
        interval,
        cancel_token,
    } = params;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let records_written = counters.records_written.load(Ordering::Relaxed);
                    let bytes_written = counters.bytes_written.load(Ordering::Relaxed);

                    event_tx
                        .send(Event::Progress {
                            id,
                            percent: percent(records_written, total_records),
                            records_written,
                            bytes_written,
                        })
                        .ok();
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as f32
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_bounded() {
        assert_eq!(percent(0, 200), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(300, 200), 100.0);
        assert_eq!(percent(0, 0), 100.0);
    }

    #[tokio::test]
    async fn reporter_emits_until_cancelled() {
        let (event_tx, mut rx) = broadcast::channel(16);
        let counters = Arc::new(ExportCounters::default());
        counters.records_written.store(40, Ordering::Relaxed);
        counters.bytes_written.store(1_024, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let handle = spawn_progress_reporter(ProgressReporterParams {
            id: ExportId(3),
            total_records: 80,
            counters,
            event_tx,
            interval: Duration::from_millis(10),
            cancel_token: cancel.clone(),
        });

        let event = rx.recv().await.unwrap();
        match event {
            Event::Progress {
                id,
                percent,
                records_written,
                bytes_written,
            } => {
                assert_eq!(id, ExportId(3));
                assert_eq!(percent, 50.0);
                assert_eq!(records_written, 40);
                assert_eq!(bytes_written, 1_024);
            }
            other => panic!("unexpected event {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}
