//! Latency-driven page size estimation

use std::time::Duration;

use crate::config::PagingConfig;

/// Shortest duration the estimator divides by
const MIN_OBSERVED_SECS: f64 = 0.001;

/// Maps the last observed fetch to the next page size
///
/// Pages scale by `threshold / last_duration`: a fetch that took half the
/// threshold doubles the next page, one that took twice as long halves it.
#[derive(Clone, Debug)]
pub struct PageSizeEstimator {
    threshold_secs: f64,
    initial: u64,
    max: u64,
}

impl PageSizeEstimator {
    /// Build an estimator from paging settings
    pub fn new(config: &PagingConfig) -> Self {
        Self {
            threshold_secs: config.latency_threshold.as_secs_f64(),
            initial: config.initial_page_size.max(1),
            max: config.max_page_size.max(1),
        }
    }

    /// Page size used before any fetch has been observed
    pub fn initial_page_size(&self) -> u64 {
        self.initial
    }

    /// Next page size for a request of `total_records`
    ///
    /// Without an observed duration the previous size (or the initial size) is
    /// kept. The result is always within `[1, max_page_size]`. Small requests
    /// (at most one initial page) are capped at `total_records`; larger ones
    /// at `total_records - initial_page_size`.
    pub fn next_page_size(
        &self,
        total_records: u64,
        last_page_size: Option<u64>,
        last_duration: Option<Duration>,
    ) -> u64 {
        let base = last_page_size.unwrap_or(self.initial) as f64;
        let ratio = match last_duration {
            Some(d) => self.threshold_secs / d.as_secs_f64().max(MIN_OBSERVED_SECS),
            None => 1.0,
        };

        // f64 -> u64 casts saturate, so huge ratios land on u64::MAX before the clamp
        let proposed = (ratio * base).round() as u64;
        let mut size = proposed.clamp(1, self.max);

        let ceiling = if total_records <= self.initial {
            total_records
        } else {
            total_records - self.initial
        };
        size = size.min(ceiling);

        size.max(1)
    }
}
