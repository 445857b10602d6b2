//! Adaptive paging
//!
//! [`estimator`] turns the latency of the most recent fetch into the size of
//! the next page; [`FetchAllocator`] hands out non-overlapping tasks that
//! partition `[0, total_records)`.

pub mod allocator;
pub mod estimator;

pub use allocator::FetchAllocator;
pub use estimator::PageSizeEstimator;
