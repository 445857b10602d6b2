//! Custom test assertions for export tests

use report_stream::{Event, SyntheticDataSource};
use std::time::Duration;
use tokio::sync::broadcast;

/// Collect events until timeout or predicate is satisfied
///
/// Subscribe before starting the export, or the first events are missed.
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Whether the event ends an export
pub fn is_terminal(event: &Event) -> bool {
    matches!(event, Event::Succeeded { .. } | Event::Failed { .. })
}

/// Assert `text` is the tab-delimited export of the first `total` synthetic rows
pub fn assert_delimited_rows(text: &str, source: &SyntheticDataSource, total: u64) {
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines.len() as u64,
        total + 1,
        "expected header plus {total} rows"
    );
    assert!(lines[0].starts_with("Id\tEmployee Id"), "header: {}", lines[0]);

    for (i, line) in lines[1..].iter().enumerate() {
        let expected = source.row(i as u64).join("\t");
        assert_eq!(*line, expected, "row {i}");
    }
}

/// Number of non-overlapping occurrences of `needle` in `haystack`
pub fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}
