//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use keyword_sweep::executor::{BatchObserver, Delay};
use keyword_sweep::lookup::KeywordLookup;
use keyword_sweep::models::{FilterThresholds, LookupOutcome, SearchResult};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Lookup that succeeds for every keyword except the ones told to fail
#[derive(Default)]
pub struct FakeLookup {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeLookup {
    pub fn failing(keywords: &[&str]) -> Self {
        Self {
            failing: keywords.iter().map(|k| (*k).to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeywordLookup for FakeLookup {
    async fn lookup(
        &self,
        keyword: &str,
        _region: &str,
        _filters: &FilterThresholds,
        _headless: bool,
    ) -> LookupOutcome {
        self.calls.lock().unwrap().push(keyword.to_string());
        if self.failing.contains(keyword) {
            return LookupOutcome::failure(format!("no results page for {keyword}"));
        }

        LookupOutcome {
            search_count: Some(120),
            top_sales_volume: Some(900),
            top_review_count: Some(15),
            duration_ms: Some(1200),
            error: None,
        }
    }
}

/// Timer that returns immediately and remembers what it was asked for
#[derive(Default)]
pub struct RecordingDelay {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().unwrap().push(duration);
    }
}

/// Observer that keeps every event
#[derive(Default)]
pub struct RecordingObserver {
    pub task_starts: Mutex<Vec<(String, usize, usize)>>,
    pub round_starts: Mutex<Vec<(usize, Vec<String>)>>,
    pub round_completions: Mutex<Vec<(usize, usize, usize)>>,
}

impl BatchObserver for RecordingObserver {
    fn on_task_start(&self, keyword: &str, index: usize, total: usize) {
        self.task_starts
            .lock()
            .unwrap()
            .push((keyword.to_string(), index, total));
    }

    fn on_round_start(&self, round: usize, keywords: &[String]) {
        self.round_starts.lock().unwrap().push((round, keywords.to_vec()));
    }

    fn on_round_complete(&self, round: usize, round_results: &[SearchResult], aggregate: &[SearchResult]) {
        self.round_completions
            .lock()
            .unwrap()
            .push((round, round_results.len(), aggregate.len()));
    }
}
