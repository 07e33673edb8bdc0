//! Bounded-concurrency batch execution with per-task retry.
//!
//! Tasks run in consecutive windows of `concurrency`. A window is joined
//! before the next one starts, and the executor pauses between windows to
//! stay polite towards the lookup target. Each task walks an explicit state
//! machine so retry behaviour can be tested without real timers.

use crate::error::{KeywordSweepError, Result};
use crate::lookup::KeywordLookup;
use crate::metrics::MetricsCollector;
use crate::models::{FilterThresholds, KeywordTask, SearchResult, SearchStatus};
use crate::validation::InputValidator;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff schedule used when the caller does not supply one
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(3000),
    Duration::from_millis(6000),
    Duration::from_millis(10_000),
];

/// Pause between windows
pub const DEFAULT_WINDOW_DELAY: Duration = Duration::from_millis(2000);

/// Options for one batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Tasks per window
    pub concurrency: usize,
    /// Region passed to the lookup
    pub zip_code: String,
    /// Thresholds for `meets_conditions`
    pub filters: FilterThresholds,
    /// Run the lookup without a visible browser
    pub headless: bool,
    /// Wait before retry `n` after failure `n`
    pub retry_delays: Vec<Duration>,
    /// Pause between windows
    pub window_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            zip_code: String::new(),
            filters: FilterThresholds::default(),
            headless: true,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            window_delay: DEFAULT_WINDOW_DELAY,
        }
    }
}

impl BatchOptions {
    /// Reject options that make no sense before any work starts
    pub fn validate(&self) -> Result<()> {
        InputValidator::validate_concurrency(self.concurrency)?;
        InputValidator::validate_filters(&self.filters)?;
        InputValidator::validate_retry_delays(&self.retry_delays)?;
        Ok(())
    }
}

/// Pauses between attempts and windows
#[async_trait]
pub trait Delay: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real timer backed by tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Progress callbacks for batch and round runs
///
/// All methods default to doing nothing.
pub trait BatchObserver: Send + Sync {
    /// A task is being dispatched. `index` is 1-based over the whole batch.
    fn on_task_start(&self, _keyword: &str, _index: usize, _total: usize) {}

    /// A retry round is about to run over `keywords`.
    fn on_round_start(&self, _round: usize, _keywords: &[String]) {}

    /// A round finished. `round_results` holds only this round's tasks.
    fn on_round_complete(
        &self,
        _round: usize,
        _round_results: &[SearchResult],
        _aggregate: &[SearchResult],
    ) {
    }
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// Where a task is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Not started
    Pending,
    /// Lookup in flight
    Running {
        /// Zero-based attempt number
        attempt: usize,
    },
    /// Waiting before the next attempt
    RetryScheduled {
        /// Attempt that just failed
        attempt: usize,
        /// Wait before the next attempt
        delay: Duration,
    },
    /// Lookup returned data
    Succeeded,
    /// Retries exhausted
    Failed {
        /// Last failure message
        error: String,
    },
    /// Stopped by the caller
    Cancelled,
}

/// Retry state machine for a single task
///
/// `Pending -> Running -> (Succeeded | RetryScheduled -> Running | Failed)`,
/// with `Cancelled` reachable from any non-final state.
#[derive(Debug, Clone)]
pub struct TaskMachine<'a> {
    state: TaskState,
    attempts: usize,
    retry_delays: &'a [Duration],
    last_error: Option<String>,
}

impl<'a> TaskMachine<'a> {
    /// Start a machine with the given backoff schedule
    #[must_use]
    pub const fn new(retry_delays: &'a [Duration]) -> Self {
        Self {
            state: TaskState::Pending,
            attempts: 0,
            retry_delays,
            last_error: None,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &TaskState {
        &self.state
    }

    /// Attempts started so far
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Delay before the next attempt, if one is scheduled
    #[must_use]
    pub const fn next_delay(&self) -> Option<Duration> {
        match self.state {
            TaskState::RetryScheduled { delay, .. } => Some(delay),
            _ => None,
        }
    }

    /// True once the task can no longer change
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(
            self.state,
            TaskState::Succeeded | TaskState::Failed { .. } | TaskState::Cancelled
        )
    }

    /// Begin an attempt. Returns false if the task already finished.
    pub fn start(&mut self) -> bool {
        match self.state {
            TaskState::Pending | TaskState::RetryScheduled { .. } => {
                self.state = TaskState::Running {
                    attempt: self.attempts,
                };
                self.attempts += 1;
                true
            },
            _ => false,
        }
    }

    /// The running attempt returned data
    pub fn succeed(&mut self) {
        if matches!(self.state, TaskState::Running { .. }) {
            self.state = TaskState::Succeeded;
        }
    }

    /// The running attempt failed; schedules a retry or gives up.
    ///
    /// Returns the backoff delay when another attempt is scheduled.
    pub fn fail(&mut self, error: impl Into<String>) -> Option<Duration> {
        let TaskState::Running { attempt } = self.state else {
            return None;
        };

        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }

        if let Some(&delay) = self.retry_delays.get(attempt) {
            self.last_error = Some(error);
            self.state = TaskState::RetryScheduled { attempt, delay };
            Some(delay)
        } else {
            self.last_error = Some(error.clone());
            self.state = TaskState::Failed { error };
            None
        }
    }

    /// Stop the task; finished tasks keep their state
    pub fn cancel(&mut self) {
        if !self.is_finished() {
            self.state = TaskState::Cancelled;
        }
    }

    /// Message of the most recent failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Runs task lists against a lookup
pub struct BatchExecutor {
    lookup: Arc<dyn KeywordLookup>,
    delay: Arc<dyn Delay>,
    metrics: Arc<MetricsCollector>,
}

impl BatchExecutor {
    /// Executor using real timers
    pub fn new(lookup: Arc<dyn KeywordLookup>) -> Self {
        Self {
            lookup,
            delay: Arc::new(TokioDelay),
            metrics: Arc::new(MetricsCollector::default()),
        }
    }

    /// Replace the timer used for backoff and window pauses
    #[must_use]
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    /// Share a metrics collector with other components
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics recorded by this executor
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Run `tasks` window by window and return one result per task, in input order.
    ///
    /// Once `cancel` fires no further window starts; tasks that never ran and
    /// tasks interrupted mid-flight come back as cancelled.
    pub async fn run_batch(
        &self,
        tasks: &[KeywordTask],
        options: &BatchOptions,
        observer: &dyn BatchObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        options.validate()?;
        if tasks.is_empty() {
            return Err(KeywordSweepError::validation("Task list cannot be empty"));
        }

        let total = tasks.len();
        let window_count = total.div_ceil(options.concurrency);
        let mut results = Vec::with_capacity(total);

        info!(
            total,
            concurrency = options.concurrency,
            windows = window_count,
            "Starting batch"
        );

        for (window_index, window) in tasks.chunks(options.concurrency).enumerate() {
            let offset = window_index * options.concurrency;

            if cancel.is_cancelled() {
                info!(
                    completed = offset,
                    remaining = total - offset,
                    "Batch cancelled, not starting further windows"
                );
                for task in &tasks[offset..] {
                    self.metrics.record_result(SearchStatus::Cancelled);
                    results.push(SearchResult::cancelled(task));
                }
                break;
            }

            let pending: Vec<_> = window
                .iter()
                .enumerate()
                .map(|(i, task)| {
                    observer.on_task_start(&task.keyword, offset + i + 1, total);
                    self.run_task(task, options, cancel)
                })
                .collect();
            results.extend(join_all(pending).await);

            debug!(window = window_index + 1, windows = window_count, "Window settled");

            if window_index + 1 < window_count && !cancel.is_cancelled() {
                tokio::select! {
                    () = cancel.cancelled() => {},
                    () = self.delay.sleep(options.window_delay) => {},
                }
            }
        }

        Ok(results)
    }

    async fn run_task(
        &self,
        task: &KeywordTask,
        options: &BatchOptions,
        cancel: &CancellationToken,
    ) -> SearchResult {
        let mut machine = TaskMachine::new(&options.retry_delays);

        let result = loop {
            machine.start();
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    machine.cancel();
                    break SearchResult::cancelled(task);
                },
                outcome = self.lookup.lookup(
                    &task.keyword,
                    &options.zip_code,
                    &options.filters,
                    options.headless,
                ) => outcome,
            };

            let Some(message) = outcome.error.clone() else {
                self.metrics.record_lookup(started.elapsed(), true);
                machine.succeed();
                break SearchResult::succeeded(task, &outcome, &options.filters);
            };
            self.metrics.record_lookup(started.elapsed(), false);

            let Some(delay) = machine.fail(message) else {
                let error = machine.last_error().unwrap_or("unknown error").to_string();
                warn!(keyword = %task.keyword, attempts = machine.attempts(), %error, "Keyword failed, retries exhausted");
                break SearchResult::failed(task, error);
            };

            self.metrics.record_retry();
            warn!(
                keyword = %task.keyword,
                attempt = machine.attempts(),
                retry_in_secs = delay.as_secs(),
                error = machine.last_error().unwrap_or_default(),
                "Keyword failed, retrying"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    machine.cancel();
                    break SearchResult::cancelled(task);
                },
                () = self.delay.sleep(delay) => {},
            }
        };

        self.metrics.record_result(result.status);
        result
    }
}
