use metrics::{counter, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::models::SearchStatus;

const LOOKUPS_TOTAL: &str = "keyword_sweep_lookups_total";
const LOOKUP_DURATION: &str = "keyword_sweep_lookup_duration_seconds";
const RETRIES_TOTAL: &str = "keyword_sweep_retries_total";
const RESULTS_TOTAL: &str = "keyword_sweep_results_total";
const ROUNDS_TOTAL: &str = "keyword_sweep_rounds_total";
const STORE_WRITES_TOTAL: &str = "keyword_sweep_store_writes_total";

/// Metrics collection and management
///
/// Every event goes to the global `metrics` recorder and is also tallied
/// locally so run summaries and tests can read the counts back.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    lookups: AtomicU64,
    lookup_failures: AtomicU64,
    retries: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rounds: AtomicU64,
    store_writes: AtomicU64,
    store_write_failures: AtomicU64,
}

/// Point-in-time copy of the local tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Lookup calls made, including retries
    pub lookups: u64,
    /// Lookup calls that reported an error
    pub lookup_failures: u64,
    /// Backoff retries scheduled
    pub retries: u64,
    /// Tasks that ended with data
    pub succeeded: u64,
    /// Tasks that ended failed
    pub failed: u64,
    /// Tasks stopped by cancellation
    pub cancelled: u64,
    /// Rounds executed
    pub rounds: u64,
    /// Successful result log writes
    pub store_writes: u64,
    /// Failed result log writes
    pub store_write_failures: u64,
}

impl MetricsCollector {
    /// Record one lookup call
    pub fn record_lookup(&self, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!(LOOKUPS_TOTAL, "status" => status).increment(1);
        histogram!(LOOKUP_DURATION).record(duration.as_secs_f64());

        self.lookups.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.lookup_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a scheduled retry
    pub fn record_retry(&self) {
        counter!(RETRIES_TOTAL).increment(1);
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the final status of a task
    pub fn record_result(&self, status: SearchStatus) {
        let (label, tally) = match status {
            SearchStatus::Succeeded => ("succeeded", &self.succeeded),
            SearchStatus::Failed => ("failed", &self.failed),
            SearchStatus::Cancelled => ("cancelled", &self.cancelled),
        };
        counter!(RESULTS_TOTAL, "status" => label).increment(1);
        tally.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished round
    pub fn record_round(&self) {
        counter!(ROUNDS_TOTAL).increment(1);
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a result log write
    pub fn record_store_write(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!(STORE_WRITES_TOTAL, "status" => status).increment(1);

        if success {
            self.store_writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.store_write_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read the local tallies
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rounds: self.rounds.load(Ordering::Relaxed),
            store_writes: self.store_writes.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
        }
    }
}
