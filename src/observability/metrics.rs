//! Query metrics
//!
//! Counters only, monotonic, reset only when the store is created.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing the work done by the query pipeline.
///
/// Selects take `&self`, so counters are atomics rather than plain integers.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    selects_executed: AtomicU64,
    rows_scanned: AtomicU64,
    subqueries_evaluated: AtomicU64,
}

impl QueryMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one abjoint select
    pub fn increment_selects(&self) {
        self.selects_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count rows visited by a scan
    pub fn add_rows_scanned(&self, rows: u64) {
        self.rows_scanned.fetch_add(rows, Ordering::Relaxed);
    }

    /// Count one `$in`/`$nin` subquery execution
    pub fn increment_subqueries(&self) {
        self.subqueries_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of subqueries executed so far
    pub fn subqueries_evaluated(&self) -> u64 {
        self.subqueries_evaluated.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            selects_executed: self.selects_executed.load(Ordering::Relaxed),
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            subqueries_evaluated: self.subqueries_evaluated.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of the query counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub selects_executed: u64,
    pub rows_scanned: u64,
    pub subqueries_evaluated: u64,
}
