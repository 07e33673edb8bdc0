//! Round-based retry over whole batches.
//!
//! Round 1 runs every task. Each further round runs only the tasks whose
//! result failed, and its results replace the earlier ones for the same
//! keyword. Remaining failures after the last round are reported in the
//! [`RoundReport`], never raised.

use crate::error::{KeywordSweepError, Result};
use crate::executor::{BatchExecutor, BatchObserver, BatchOptions};
use crate::models::{KeywordTask, SearchResult};
use crate::validation::InputValidator;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the merged aggregate is ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultOrder {
    /// Same order as the original task list
    #[default]
    TaskOrder,
    /// Most recently completed first, as an interactive view shows them
    MostRecentFirst,
}

/// Options for a multi-round run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOptions {
    /// Total rounds, including the first
    pub max_rounds: usize,
    /// Options handed to every batch
    pub batch: BatchOptions,
    /// Presentation order of the aggregate
    pub order: ResultOrder,
}

impl Default for RoundOptions {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            batch: BatchOptions::default(),
            order: ResultOrder::default(),
        }
    }
}

/// Outcome of a multi-round run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// One result per original task
    pub results: Vec<SearchResult>,
    /// Rounds actually executed
    pub rounds_executed: usize,
    /// Results still failed after the last round
    pub remaining_errors: usize,
}

/// Drives repeated batches over the failing subset
pub struct RoundController<'a> {
    executor: &'a BatchExecutor,
}

impl<'a> RoundController<'a> {
    /// Wrap an executor
    #[must_use]
    pub const fn new(executor: &'a BatchExecutor) -> Self {
        Self { executor }
    }

    /// Run `tasks`, retrying failed keywords for up to `max_rounds` rounds in total.
    pub async fn run_with_retries(
        &self,
        tasks: &[KeywordTask],
        options: &RoundOptions,
        observer: &dyn BatchObserver,
        cancel: &CancellationToken,
    ) -> Result<RoundReport> {
        InputValidator::validate_max_rounds(options.max_rounds)?;
        if tasks.is_empty() {
            return Err(KeywordSweepError::validation("Task list cannot be empty"));
        }

        let mut aggregate = self
            .executor
            .run_batch(tasks, &options.batch, observer, cancel)
            .await?;
        let mut rounds_executed = 1;
        self.executor.metrics().record_round();
        observer.on_round_complete(rounds_executed, &aggregate, &aggregate);
        log_round(rounds_executed, &aggregate);

        let task_by_keyword: HashMap<&str, &KeywordTask> =
            tasks.iter().map(|t| (t.keyword.as_str(), t)).collect();

        while rounds_executed < options.max_rounds && !cancel.is_cancelled() {
            let retry_tasks: Vec<KeywordTask> = aggregate
                .iter()
                .filter(|r| r.is_failed())
                .filter_map(|r| task_by_keyword.get(r.keyword.as_str()).map(|t| (*t).clone()))
                .collect();
            if retry_tasks.is_empty() {
                break;
            }

            let round = rounds_executed + 1;
            let keywords: Vec<String> = retry_tasks.iter().map(|t| t.keyword.clone()).collect();
            info!(round, keywords = keywords.len(), "Starting retry round");
            observer.on_round_start(round, &keywords);

            let round_results = self
                .executor
                .run_batch(&retry_tasks, &options.batch, observer, cancel)
                .await?;
            rounds_executed = round;
            self.executor.metrics().record_round();

            merge_results(&mut aggregate, &round_results);
            observer.on_round_complete(round, &round_results, &aggregate);
            log_round(round, &aggregate);
        }

        if options.order == ResultOrder::MostRecentFirst {
            aggregate.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        }

        let remaining_errors = aggregate.iter().filter(|r| r.is_failed()).count();
        if remaining_errors > 0 {
            warn!(remaining_errors, rounds_executed, "Keywords still failing after final round");
        }

        Ok(RoundReport {
            results: aggregate,
            rounds_executed,
            remaining_errors,
        })
    }
}

/// Replace aggregate entries with newer results for the same keyword.
///
/// Keywords absent from `newer` keep their result and the aggregate order is
/// unchanged.
pub fn merge_results(aggregate: &mut [SearchResult], newer: &[SearchResult]) {
    let replacements: HashMap<&str, &SearchResult> =
        newer.iter().map(|r| (r.keyword.as_str(), r)).collect();

    for slot in aggregate.iter_mut() {
        if let Some(replacement) = replacements.get(slot.keyword.as_str()) {
            *slot = (*replacement).clone();
        }
    }
}

fn log_round(round: usize, aggregate: &[SearchResult]) {
    let errors = aggregate.iter().filter(|r| r.is_failed()).count();
    let cancelled = aggregate.iter().filter(|r| r.is_cancelled()).count();
    info!(
        round,
        succeeded = aggregate.len() - errors - cancelled,
        errors,
        cancelled,
        "Round complete"
    );
}
