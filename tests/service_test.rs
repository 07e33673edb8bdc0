//! End-to-end tests: prepare, run rounds and record attempts

mod common;

use common::{FakeLookup, RecordingDelay};
use keyword_sweep::executor::{BatchExecutor, BatchOptions, NoopObserver};
use keyword_sweep::models::{FilterThresholds, ImportEntry, SearchStatus};
use keyword_sweep::rounds::RoundOptions;
use keyword_sweep::service::SearchService;
use keyword_sweep::store::{KeywordStore, RecencyPolicy};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn service(store: Arc<KeywordStore>, lookup: Arc<FakeLookup>) -> SearchService {
    let executor = BatchExecutor::new(lookup).with_delay(Arc::new(RecordingDelay::default()));
    SearchService::with_executor(store, executor)
}

fn round_options() -> RoundOptions {
    RoundOptions {
        max_rounds: 2,
        batch: BatchOptions {
            zip_code: "94103".to_string(),
            retry_delays: Vec::new(),
            ..BatchOptions::default()
        },
        ..RoundOptions::default()
    }
}

#[tokio::test]
async fn test_every_attempt_is_logged() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeywordStore::open(dir.path().join("database.json")));
    let lookup = Arc::new(FakeLookup::failing(&["B"]));
    let service = service(store.clone(), lookup);

    let run = service
        .run(&["A", "B", "C"], 30, &round_options(), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.report.rounds_executed, 2);
    assert_eq!(run.summary.total, 3);
    assert_eq!(run.summary.succeeded, 2);
    assert_eq!(run.summary.errors, 1);
    assert_eq!(run.persistence_failures, 0);

    let log = store.search_results().unwrap();
    let keywords: Vec<&str> = log.iter().map(|r| r.keyword.as_str()).collect();
    assert_eq!(keywords, vec!["A", "B", "C", "B"]);
    assert!(log[1].error.is_some());
    assert_eq!(log[1].search_count, None);
    assert_eq!(log[0].zip_code.as_deref(), Some("94103"));
    assert_eq!(log[0].filters, FilterThresholds::default());

    let ids: Vec<i64> = log.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_second_run_inside_window_is_skipped() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeywordStore::open(dir.path().join("database.json")));
    let lookup = Arc::new(FakeLookup::default());
    let service = service(store, lookup.clone());
    let cancel = CancellationToken::new();

    service
        .run(&["lamp"], 30, &round_options(), &NoopObserver, &cancel)
        .await
        .unwrap();
    let second = service
        .run(&["lamp"], 30, &round_options(), &NoopObserver, &cancel)
        .await
        .unwrap();

    assert_eq!(second.skipped.len(), 1);
    assert!(second.report.results.is_empty());
    assert_eq!(second.report.rounds_executed, 0);
    assert_eq!(lookup.calls().len(), 1);
}

#[tokio::test]
async fn test_matching_policy_reruns_under_new_thresholds() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeywordStore::open(dir.path().join("database.json")));
    let lookup = Arc::new(FakeLookup::default());
    let cancel = CancellationToken::new();

    service(store.clone(), lookup.clone())
        .run(&["lamp"], 30, &round_options(), &NoopObserver, &cancel)
        .await
        .unwrap();

    let mut stricter = round_options();
    stricter.batch.filters.max_reviews = 10;
    let rerun = service(store, lookup.clone())
        .with_policy(RecencyPolicy::MatchingFilters(stricter.batch.filters))
        .run(&["lamp"], 30, &stricter, &NoopObserver, &cancel)
        .await
        .unwrap();

    assert!(rerun.skipped.is_empty());
    assert_eq!(rerun.report.results.len(), 1);
    assert_eq!(lookup.calls().len(), 2);
}

#[tokio::test]
async fn test_cancelled_tasks_are_not_logged() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeywordStore::open(dir.path().join("database.json")));
    let lookup = Arc::new(FakeLookup::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = service(store.clone(), lookup.clone())
        .run(&["a", "b"], 30, &round_options(), &NoopObserver, &cancel)
        .await
        .unwrap();

    assert_eq!(run.summary.cancelled, 2);
    assert!(run.report.results.iter().all(|r| r.status == SearchStatus::Cancelled));
    assert!(store.search_results().unwrap().is_empty());
    assert!(lookup.calls().is_empty());
}

#[tokio::test]
async fn test_store_write_failure_does_not_lose_results() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("database.json");
    let store = Arc::new(KeywordStore::open(&path));
    store
        .upsert_translations(&[ImportEntry::new("lamp", None), ImportEntry::new("desk", None)])
        .unwrap();

    // a directory where the temp file should go makes every rewrite fail
    let mut temp = path.clone().into_os_string();
    temp.push(".tmp");
    fs::create_dir(&temp).unwrap();

    let service = service(store.clone(), Arc::new(FakeLookup::default()));
    let run = service
        .run(&["lamp", "desk"], 30, &round_options(), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.summary.succeeded, 2);
    assert_eq!(run.persistence_failures, 2);
    assert_eq!(service.metrics().snapshot().store_write_failures, 2);
    assert!(store.search_results().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_options_rejected_before_prepare() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeywordStore::open(dir.path().join("database.json")));
    let mut options = round_options();
    options.batch.concurrency = 11;

    let err = service(store.clone(), Arc::new(FakeLookup::default()))
        .run(&["lamp"], 30, &options, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(!store.path().exists());
}

#[tokio::test]
async fn test_huge_window_rejected_before_prepare() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeywordStore::open(dir.path().join("database.json")));
    let lookup = Arc::new(FakeLookup::default());

    let err = service(store.clone(), lookup.clone())
        .run(&["lamp"], u32::MAX, &round_options(), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(lookup.calls().is_empty());
    assert!(!store.path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attempts_logged_on_multi_thread_runtime() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeywordStore::open(dir.path().join("database.json")));
    let lookup = Arc::new(FakeLookup::failing(&["chair"]));

    let run = service(store.clone(), lookup)
        .run(&["lamp", "chair"], 30, &round_options(), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.persistence_failures, 0);
    assert_eq!(run.report.rounds_executed, 2);
    // lamp once, chair in both rounds
    assert_eq!(store.search_results().unwrap().len(), 3);
}
