//! Data models for keyword catalogs, result logs and batch runs
//!
//! This module contains the persisted records, the ephemeral task types fed to
//! the executor and the per-keyword results it produces. Numeric lookup values
//! are `Option<i64>` throughout: `None` means "unknown", which is not the same
//! as a legitimate `0`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds a lookup result must satisfy to count as a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterThresholds {
    /// Search result count must be strictly below this
    pub max_search_results: i64,
    /// Top monthly sales must be strictly above this
    #[serde(alias = "minMonthSales")]
    pub min_monthly_sales: i64,
    /// Top review count must be strictly below this
    pub max_reviews: i64,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            max_search_results: 500,
            min_monthly_sales: 500,
            max_reviews: 100,
        }
    }
}

impl FilterThresholds {
    /// Check a lookup's numbers against the thresholds.
    ///
    /// All comparisons are strict and any unknown value disqualifies.
    #[must_use]
    pub fn is_met_by(
        &self,
        search_count: Option<i64>,
        top_sales_volume: Option<i64>,
        top_review_count: Option<i64>,
    ) -> bool {
        let (Some(count), Some(sales), Some(reviews)) =
            (search_count, top_sales_volume, top_review_count)
        else {
            return false;
        };

        count < self.max_search_results
            && sales > self.min_monthly_sales
            && reviews < self.max_reviews
    }
}

/// A keyword known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRecord {
    /// Catalog identifier, never reused
    pub id: i64,
    /// Trimmed keyword text, unique across the catalog
    #[serde(alias = "text")]
    pub keyword: String,
    /// Optional human translation of the keyword
    pub translation: Option<String>,
    /// When the keyword was first seen
    pub created_at: DateTime<Utc>,
    /// When the translation last changed
    pub updated_at: DateTime<Utc>,
}

/// One entry of the append-only result log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultRecord {
    /// Log identifier
    pub id: i64,
    /// Catalog id of the keyword at write time
    pub keyword_id: i64,
    /// Keyword text snapshot
    pub keyword: String,
    /// Translation snapshot
    pub translation: Option<String>,
    /// Total search result count
    #[serde(alias = "searchResults")]
    pub search_count: Option<i64>,
    /// Highest monthly sales among top results
    #[serde(alias = "maxMonthSales")]
    pub top_sales_volume: Option<i64>,
    /// Highest review count among top results
    #[serde(alias = "maxReviews")]
    pub top_review_count: Option<i64>,
    /// Whether the thresholds were met
    pub meets_conditions: bool,
    /// Lookup duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Final error message, if the attempt failed
    pub error: Option<String>,
    /// Region the lookup ran against
    #[serde(default)]
    pub zip_code: Option<String>,
    /// Thresholds in effect for this attempt
    #[serde(alias = "filtersSnapshot")]
    pub filters: FilterThresholds,
    /// When the attempt was recorded
    pub created_at: DateTime<Utc>,
}

/// A keyword eligible to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordTask {
    /// Catalog id
    pub keyword_id: i64,
    /// Keyword text
    pub keyword: String,
    /// Translation, if known
    pub translation: Option<String>,
    /// Most recent prior search, outside the recency window
    pub last_searched_at: Option<DateTime<Utc>>,
}

impl KeywordTask {
    /// Build a task that has no catalog history, e.g. for ad-hoc runs.
    pub fn new(keyword_id: i64, keyword: impl Into<String>) -> Self {
        Self {
            keyword_id,
            keyword: keyword.into(),
            translation: None,
            last_searched_at: None,
        }
    }
}

/// A keyword withheld because it was searched inside the recency window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedTask {
    /// Catalog id
    pub keyword_id: i64,
    /// Keyword text
    pub keyword: String,
    /// Translation, if known
    pub translation: Option<String>,
    /// The search that caused the skip
    pub last_searched_at: DateTime<Utc>,
}

/// Output of task preparation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTasks {
    /// Keywords to run, in first-occurrence order
    pub tasks: Vec<KeywordTask>,
    /// Keywords withheld by the recency window
    pub skipped: Vec<SkippedTask>,
}

/// One row of a translation import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    /// Keyword text, trimmed on import
    pub keyword: String,
    /// Translation; blank counts as absent
    pub translation: Option<String>,
}

impl ImportEntry {
    /// Convenience constructor
    pub fn new(keyword: impl Into<String>, translation: Option<&str>) -> Self {
        Self {
            keyword: keyword.into(),
            translation: translation.map(str::to_string),
        }
    }
}

/// Counts reported by a translation import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Entries received
    pub total: usize,
    /// New keywords added
    pub inserted: usize,
    /// Existing keywords whose translation changed
    pub updated: usize,
    /// Existing keywords left as they were
    pub unchanged: usize,
    /// Entries with a blank keyword
    pub skipped: usize,
}

/// Input for appending one attempt to the result log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResultInput {
    /// Catalog id, if the caller already knows it
    pub keyword_id: Option<i64>,
    /// Keyword text, used when no id is given
    pub keyword: String,
    /// Translation to store when it differs from the catalog
    pub translation: Option<String>,
    /// Total search result count
    pub search_count: Option<i64>,
    /// Highest monthly sales among top results
    pub top_sales_volume: Option<i64>,
    /// Highest review count among top results
    pub top_review_count: Option<i64>,
    /// Whether the thresholds were met
    pub meets_conditions: bool,
    /// Lookup duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Final error message
    pub error: Option<String>,
    /// Region the lookup ran against
    pub zip_code: Option<String>,
    /// Thresholds in effect
    pub filters: FilterThresholds,
}

impl RecordResultInput {
    /// Build a log entry from an executor result.
    #[must_use]
    pub fn from_result(result: &SearchResult, zip_code: &str, filters: FilterThresholds) -> Self {
        Self {
            keyword_id: result.keyword_id,
            keyword: result.keyword.clone(),
            translation: result.translation.clone(),
            search_count: result.search_count,
            top_sales_volume: result.top_sales_volume,
            top_review_count: result.top_review_count,
            meets_conditions: result.meets_conditions,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
            zip_code: (!zip_code.is_empty()).then(|| zip_code.to_string()),
            filters,
        }
    }
}

/// What the external lookup reports for one keyword
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupOutcome {
    /// Total search result count
    pub search_count: Option<i64>,
    /// Highest monthly sales among top results
    pub top_sales_volume: Option<i64>,
    /// Highest review count among top results
    pub top_review_count: Option<i64>,
    /// Time the lookup took
    pub duration_ms: Option<u64>,
    /// Set when the lookup failed
    pub error: Option<String>,
}

impl LookupOutcome {
    /// A failed lookup carrying only its message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// How a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    /// The lookup returned data
    Succeeded,
    /// Every attempt failed
    Failed,
    /// Stopped by the caller
    Cancelled,
}

/// Final result of one task within a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Catalog id, if the task came from the catalog
    pub keyword_id: Option<i64>,
    /// Keyword text
    pub keyword: String,
    /// Translation carried from the task
    pub translation: Option<String>,
    /// Total search result count
    pub search_count: Option<i64>,
    /// Highest monthly sales among top results
    pub top_sales_volume: Option<i64>,
    /// Highest review count among top results
    pub top_review_count: Option<i64>,
    /// Whether the thresholds were met
    pub meets_conditions: bool,
    /// Lookup duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Outcome of the task
    pub status: SearchStatus,
    /// Last failure message; only set for `Failed`
    pub error: Option<String>,
    /// When the task settled
    pub completed_at: DateTime<Utc>,
}

impl SearchResult {
    /// True for results the round controller should retry.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == SearchStatus::Failed
    }

    /// True when the caller stopped this task.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status == SearchStatus::Cancelled
    }

    /// Build a successful result from a lookup outcome.
    #[must_use]
    pub fn succeeded(task: &KeywordTask, outcome: &LookupOutcome, filters: &FilterThresholds) -> Self {
        Self {
            keyword_id: Some(task.keyword_id),
            keyword: task.keyword.clone(),
            translation: task.translation.clone(),
            search_count: outcome.search_count,
            top_sales_volume: outcome.top_sales_volume,
            top_review_count: outcome.top_review_count,
            meets_conditions: filters.is_met_by(
                outcome.search_count,
                outcome.top_sales_volume,
                outcome.top_review_count,
            ),
            duration_ms: outcome.duration_ms,
            status: SearchStatus::Succeeded,
            error: None,
            completed_at: Utc::now(),
        }
    }

    /// Build a failed result carrying the last error message.
    #[must_use]
    pub fn failed(task: &KeywordTask, message: impl Into<String>) -> Self {
        Self {
            status: SearchStatus::Failed,
            error: Some(message.into()),
            ..Self::empty(task)
        }
    }

    /// Build a cancelled result.
    #[must_use]
    pub fn cancelled(task: &KeywordTask) -> Self {
        Self {
            status: SearchStatus::Cancelled,
            ..Self::empty(task)
        }
    }

    fn empty(task: &KeywordTask) -> Self {
        Self {
            keyword_id: Some(task.keyword_id),
            keyword: task.keyword.clone(),
            translation: task.translation.clone(),
            search_count: None,
            top_sales_volume: None,
            top_review_count: None,
            meets_conditions: false,
            duration_ms: None,
            status: SearchStatus::Succeeded,
            error: None,
            completed_at: Utc::now(),
        }
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Keywords in the aggregate
    pub total: usize,
    /// Keywords whose lookup returned data
    pub succeeded: usize,
    /// Keywords meeting the thresholds
    pub meets: usize,
    /// Keywords still failing after the last round
    pub errors: usize,
    /// Keywords stopped by cancellation
    pub cancelled: usize,
    /// Wall-clock time of the run
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl RunSummary {
    /// Tally an aggregate.
    #[must_use]
    pub fn from_results(results: &[SearchResult], duration: Duration) -> Self {
        let mut summary = Self {
            total: results.len(),
            duration,
            ..Self::default()
        };

        for result in results {
            match result.status {
                SearchStatus::Succeeded => summary.succeeded += 1,
                SearchStatus::Failed => summary.errors += 1,
                SearchStatus::Cancelled => summary.cancelled += 1,
            }
            if result.meets_conditions {
                summary.meets += 1;
            }
        }

        summary
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
