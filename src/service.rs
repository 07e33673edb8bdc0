use crate::error::Result;
use crate::executor::{BatchExecutor, BatchObserver};
use crate::lookup::KeywordLookup;
use crate::metrics::MetricsCollector;
use crate::models::{FilterThresholds, RecordResultInput, RunSummary, SearchResult, SkippedTask};
use crate::rounds::{RoundController, RoundOptions, RoundReport};
use crate::store::{KeywordStore, RecencyPolicy};
use crate::validation::InputValidator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything a caller needs after a run
#[derive(Debug, Clone)]
pub struct SearchRun {
    /// Keywords withheld by the recency window
    pub skipped: Vec<SkippedTask>,
    /// Merged results and round counts
    pub report: RoundReport,
    /// Totals over `report.results`
    pub summary: RunSummary,
    /// Result log writes that failed and were skipped
    pub persistence_failures: usize,
}

/// Prepares, runs and records keyword searches against one store
pub struct SearchService {
    store: Arc<KeywordStore>,
    executor: BatchExecutor,
    policy: RecencyPolicy,
}

impl SearchService {
    pub fn new(store: Arc<KeywordStore>, lookup: Arc<dyn KeywordLookup>) -> Self {
        Self::with_executor(store, BatchExecutor::new(lookup))
    }

    /// Use a preconfigured executor, e.g. one with a test timer
    pub fn with_executor(store: Arc<KeywordStore>, executor: BatchExecutor) -> Self {
        Self {
            store,
            executor,
            policy: RecencyPolicy::default(),
        }
    }

    /// Choose which prior results count against the recency window
    #[must_use]
    pub fn with_policy(mut self, policy: RecencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<KeywordStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.executor.metrics()
    }

    /// Prepare `keywords`, run the runnable ones and log every attempt.
    ///
    /// Result log writes are best-effort: a failed write is logged and
    /// counted but never drops a result from the returned report.
    ///
    /// Writes are synchronous file I/O issued after each round. On a
    /// multi-threaded runtime they run through `block_in_place`; on a
    /// current-thread runtime they block the runtime thread while they last.
    pub async fn run<S: AsRef<str>>(
        &self,
        keywords: &[S],
        window_days: u32,
        options: &RoundOptions,
        observer: &dyn BatchObserver,
        cancel: &CancellationToken,
    ) -> Result<SearchRun> {
        options.batch.validate()?;
        InputValidator::validate_max_rounds(options.max_rounds)?;
        InputValidator::validate_window_days(window_days)?;
        let started = Instant::now();
        let prepared = self
            .store
            .prepare_tasks_with_policy(keywords, window_days, self.policy)?;

        for skipped in &prepared.skipped {
            info!(
                keyword = %skipped.keyword,
                last_searched_at = %skipped.last_searched_at,
                "Skipping recently searched keyword"
            );
        }

        if prepared.tasks.is_empty() {
            info!(skipped = prepared.skipped.len(), "Nothing to run");
            return Ok(SearchRun {
                skipped: prepared.skipped,
                report: RoundReport {
                    results: Vec::new(),
                    rounds_executed: 0,
                    remaining_errors: 0,
                },
                summary: RunSummary::from_results(&[], started.elapsed()),
                persistence_failures: 0,
            });
        }

        let recorder = RecordingObserver {
            store: &self.store,
            metrics: self.executor.metrics(),
            zip_code: &options.batch.zip_code,
            filters: options.batch.filters,
            failures: AtomicUsize::new(0),
            inner: observer,
        };

        let report = RoundController::new(&self.executor)
            .run_with_retries(&prepared.tasks, options, &recorder, cancel)
            .await?;

        let summary = RunSummary::from_results(&report.results, started.elapsed());
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            meets = summary.meets,
            errors = summary.errors,
            cancelled = summary.cancelled,
            skipped = prepared.skipped.len(),
            duration_ms = summary.duration.as_millis(),
            "Search run finished"
        );

        Ok(SearchRun {
            skipped: prepared.skipped,
            persistence_failures: recorder.failures.load(Ordering::Relaxed),
            report,
            summary,
        })
    }
}

/// Appends each round's attempts to the result log, then forwards events
struct RecordingObserver<'a> {
    store: &'a KeywordStore,
    metrics: &'a MetricsCollector,
    zip_code: &'a str,
    filters: FilterThresholds,
    failures: AtomicUsize,
    inner: &'a dyn BatchObserver,
}

impl RecordingObserver<'_> {
    fn record(&self, result: &SearchResult) {
        let input = RecordResultInput::from_result(result, self.zip_code, self.filters);
        match run_blocking(|| self.store.record_result(input)) {
            Ok(_) => self.metrics.record_store_write(true),
            Err(e) => {
                self.metrics.record_store_write(false);
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(keyword = %result.keyword, error = %e, "Failed to record search result");
            },
        }
    }
}

fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        },
        _ => f(),
    }
}

impl BatchObserver for RecordingObserver<'_> {
    fn on_task_start(&self, keyword: &str, index: usize, total: usize) {
        self.inner.on_task_start(keyword, index, total);
    }

    fn on_round_start(&self, round: usize, keywords: &[String]) {
        self.inner.on_round_start(round, keywords);
    }

    fn on_round_complete(&self, round: usize, round_results: &[SearchResult], aggregate: &[SearchResult]) {
        round_results
            .iter()
            .filter(|r| !r.is_cancelled())
            .for_each(|r| self.record(r));
        self.inner.on_round_complete(round, round_results, aggregate);
    }
}
