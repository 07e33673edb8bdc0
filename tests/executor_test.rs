//! Integration tests for batch execution

mod common;

use common::{FakeLookup, RecordingDelay, RecordingObserver};
use keyword_sweep::executor::{BatchExecutor, BatchOptions, NoopObserver, DEFAULT_WINDOW_DELAY};
use keyword_sweep::models::{KeywordTask, SearchStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn tasks(keywords: &[&str]) -> Vec<KeywordTask> {
    keywords
        .iter()
        .zip(1..)
        .map(|(k, id)| KeywordTask::new(id, *k))
        .collect()
}

#[tokio::test]
async fn test_windows_dispatch_in_order_and_pause_between() {
    let lookup = Arc::new(FakeLookup::default());
    let delay = Arc::new(RecordingDelay::default());
    let executor = BatchExecutor::new(lookup.clone()).with_delay(delay.clone());
    let observer = RecordingObserver::default();
    let options = BatchOptions {
        concurrency: 2,
        ..BatchOptions::default()
    };

    let input = tasks(&["a", "b", "c", "d", "e"]);
    let results = executor
        .run_batch(&input, &options, &observer, &CancellationToken::new())
        .await
        .unwrap();

    let starts = observer.task_starts.lock().unwrap().clone();
    let indices: Vec<usize> = starts.iter().map(|(_, i, _)| *i).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert!(starts.iter().all(|(_, _, total)| *total == 5));

    let keywords: Vec<&str> = results.iter().map(|r| r.keyword.as_str()).collect();
    assert_eq!(keywords, vec!["a", "b", "c", "d", "e"]);
    assert!(results.iter().all(|r| r.status == SearchStatus::Succeeded));

    // three windows, so two pauses and none after the last
    assert_eq!(delay.calls(), vec![DEFAULT_WINDOW_DELAY, DEFAULT_WINDOW_DELAY]);
    assert_eq!(lookup.calls().len(), 5);
}

#[tokio::test]
async fn test_single_window_never_pauses() {
    let delay = Arc::new(RecordingDelay::default());
    let executor = BatchExecutor::new(Arc::new(FakeLookup::default())).with_delay(delay.clone());
    let options = BatchOptions {
        concurrency: 3,
        ..BatchOptions::default()
    };

    executor
        .run_batch(&tasks(&["a", "b", "c"]), &options, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert!(delay.calls().is_empty());
}

#[tokio::test]
async fn test_failure_uses_backoff_schedule_then_fails() {
    let lookup = Arc::new(FakeLookup::failing(&["broken"]));
    let delay = Arc::new(RecordingDelay::default());
    let executor = BatchExecutor::new(lookup.clone()).with_delay(delay.clone());
    let schedule = vec![Duration::from_millis(5), Duration::from_millis(7)];
    let options = BatchOptions {
        retry_delays: schedule.clone(),
        ..BatchOptions::default()
    };

    let results = executor
        .run_batch(&tasks(&["broken"]), &options, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results[0].status, SearchStatus::Failed);
    assert_eq!(results[0].error.as_deref(), Some("no results page for broken"));
    assert_eq!(lookup.calls().len(), 3);
    assert_eq!(delay.calls(), schedule);

    let metrics = executor.metrics().snapshot();
    assert_eq!(metrics.lookups, 3);
    assert_eq!(metrics.lookup_failures, 3);
    assert_eq!(metrics.failed, 1);
}

#[tokio::test]
async fn test_meets_conditions_uses_options_filters() {
    let executor = BatchExecutor::new(Arc::new(FakeLookup::default()))
        .with_delay(Arc::new(RecordingDelay::default()));

    let loose = BatchOptions::default();
    let results = executor
        .run_batch(&tasks(&["lamp"]), &loose, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();
    assert!(results[0].meets_conditions);

    // the fake reports 15 reviews
    let mut strict = BatchOptions::default();
    strict.filters.max_reviews = 15;
    let results = executor
        .run_batch(&tasks(&["lamp"]), &strict, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!results[0].meets_conditions);
}

#[tokio::test]
async fn test_empty_task_list_rejected() {
    let lookup = Arc::new(FakeLookup::default());
    let executor = BatchExecutor::new(lookup.clone());

    let err = executor
        .run_batch(&[], &BatchOptions::default(), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(lookup.calls().is_empty());
}

#[tokio::test]
async fn test_negative_filter_rejected_before_work() {
    let lookup = Arc::new(FakeLookup::default());
    let executor = BatchExecutor::new(lookup.clone());
    let mut options = BatchOptions::default();
    options.filters.min_monthly_sales = -1;

    let err = executor
        .run_batch(&tasks(&["a"]), &options, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(lookup.calls().is_empty());
}

/// Fires the token while looking up one keyword
struct CancellingLookup {
    trigger: &'static str,
    token: CancellationToken,
}

#[async_trait::async_trait]
impl keyword_sweep::lookup::KeywordLookup for CancellingLookup {
    async fn lookup(
        &self,
        keyword: &str,
        _region: &str,
        _filters: &keyword_sweep::models::FilterThresholds,
        _headless: bool,
    ) -> keyword_sweep::models::LookupOutcome {
        if keyword == self.trigger {
            self.token.cancel();
        }
        keyword_sweep::models::LookupOutcome {
            search_count: Some(1),
            top_sales_volume: Some(1),
            top_review_count: Some(1),
            ..Default::default()
        }
    }
}

#[tokio::test]
async fn test_cancel_mid_batch_keeps_finished_window() {
    let cancel = CancellationToken::new();
    let lookup = CancellingLookup {
        trigger: "b",
        token: cancel.clone(),
    };
    let delay = Arc::new(RecordingDelay::default());
    let executor = BatchExecutor::new(Arc::new(lookup)).with_delay(delay.clone());
    let options = BatchOptions {
        concurrency: 2,
        ..BatchOptions::default()
    };

    let results = executor
        .run_batch(&tasks(&["a", "b", "c", "d"]), &options, &NoopObserver, &cancel)
        .await
        .unwrap();

    let statuses: Vec<SearchStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            SearchStatus::Succeeded,
            SearchStatus::Succeeded,
            SearchStatus::Cancelled,
            SearchStatus::Cancelled
        ]
    );
    assert!(delay.calls().is_empty());
    assert_eq!(executor.metrics().snapshot().cancelled, 2);
}

/// Lookup that never answers
#[derive(Default)]
struct StuckLookup {
    calls: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl keyword_sweep::lookup::KeywordLookup for StuckLookup {
    async fn lookup(
        &self,
        keyword: &str,
        _region: &str,
        _filters: &keyword_sweep::models::FilterThresholds,
        _headless: bool,
    ) -> keyword_sweep::models::LookupOutcome {
        self.calls.lock().unwrap().push(keyword.to_string());
        std::future::pending::<keyword_sweep::models::LookupOutcome>().await
    }
}

/// Timer that never fires on its own
#[derive(Default)]
struct StuckDelay {
    calls: std::sync::Mutex<Vec<Duration>>,
}

#[async_trait::async_trait]
impl keyword_sweep::executor::Delay for StuckDelay {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().unwrap().push(duration);
        std::future::pending::<()>().await;
    }
}

fn cancel_after(cancel: &CancellationToken, after: Duration) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        cancel.cancel();
    });
}

#[tokio::test]
async fn test_cancel_aborts_lookups_in_flight() {
    let lookup = Arc::new(StuckLookup::default());
    let executor = BatchExecutor::new(lookup.clone()).with_delay(Arc::new(RecordingDelay::default()));
    let options = BatchOptions {
        concurrency: 2,
        ..BatchOptions::default()
    };
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));

    let results = executor
        .run_batch(&tasks(&["a", "b", "c"]), &options, &NoopObserver, &cancel)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status == SearchStatus::Cancelled));
    assert!(results.iter().all(|r| r.error.is_none()));
    assert_eq!(*lookup.calls.lock().unwrap(), vec!["a", "b"]);
    assert_eq!(executor.metrics().snapshot().cancelled, 3);
}

#[tokio::test]
async fn test_cancel_during_backoff_skips_retry() {
    let lookup = Arc::new(FakeLookup::failing(&["lamp"]));
    let delay = Arc::new(StuckDelay::default());
    let executor = BatchExecutor::new(lookup.clone()).with_delay(delay.clone());
    let options = BatchOptions {
        retry_delays: vec![Duration::from_secs(1)],
        ..BatchOptions::default()
    };
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));

    let results = executor
        .run_batch(&tasks(&["lamp"]), &options, &NoopObserver, &cancel)
        .await
        .unwrap();

    assert_eq!(results[0].status, SearchStatus::Cancelled);
    assert_eq!(results[0].error, None);
    assert_eq!(lookup.calls(), vec!["lamp"]);
    assert_eq!(*delay.calls.lock().unwrap(), vec![Duration::from_secs(1)]);

    let metrics = executor.metrics().snapshot();
    assert_eq!(metrics.retries, 1);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.cancelled, 1);
}
