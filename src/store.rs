//! Durable keyword catalog and append-only result log.
//!
//! The whole state lives in one JSON document. Every operation reads the full
//! document, mutates it in memory and atomically replaces the file, so a
//! reader sees either the previous state or the new one and never a partial
//! write. Operations are serialized within the process; there is no lock
//! across processes, so two processes writing the same file may lose updates.

use crate::error::{KeywordSweepError, Result};
use crate::models::{
    FilterThresholds, ImportEntry, ImportSummary, KeywordRecord, KeywordTask, PreparedTasks,
    RecordResultInput, SearchResultRecord, SkippedTask,
};
use crate::validation::InputValidator;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Id counters persisted alongside the data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequences {
    /// Last keyword id handed out
    pub keyword_id: i64,
    /// Last result log id handed out
    pub search_result_id: i64,
}

/// The persisted document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    /// Keyword catalog in insertion order
    #[serde(default)]
    pub keywords: Vec<KeywordRecord>,
    /// Result log in insertion order
    #[serde(default)]
    pub search_results: Vec<SearchResultRecord>,
    /// Id counters
    #[serde(default)]
    pub sequences: Sequences,
}

impl StoreDocument {
    /// Keep counters ahead of every stored id, even if the file was edited by hand.
    fn reconcile_sequences(&mut self) {
        let max_keyword = self.keywords.iter().map(|k| k.id).max().unwrap_or(0);
        let max_result = self.search_results.iter().map(|r| r.id).max().unwrap_or(0);
        self.sequences.keyword_id = self.sequences.keyword_id.max(max_keyword);
        self.sequences.search_result_id = self.sequences.search_result_id.max(max_result);
    }

    fn keyword_index(&self) -> HashMap<String, usize> {
        self.keywords
            .iter()
            .enumerate()
            .map(|(i, k)| (k.keyword.clone(), i))
            .collect()
    }

    fn insert_keyword(
        &mut self,
        keyword: String,
        translation: Option<String>,
        now: DateTime<Utc>,
    ) -> usize {
        self.sequences.keyword_id += 1;
        self.keywords.push(KeywordRecord {
            id: self.sequences.keyword_id,
            keyword,
            translation,
            created_at: now,
            updated_at: now,
        });
        self.keywords.len() - 1
    }
}

/// Which prior results count against the recency window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecencyPolicy {
    /// Any recent result skips the keyword, whatever thresholds produced it
    #[default]
    AnyFilters,
    /// Only results produced under exactly these thresholds skip the keyword
    MatchingFilters(FilterThresholds),
}

impl RecencyPolicy {
    fn counts(&self, record: &SearchResultRecord) -> bool {
        match self {
            Self::AnyFilters => true,
            Self::MatchingFilters(filters) => record.filters == *filters,
        }
    }
}

/// Handle to the persisted catalog and result log
#[derive(Debug)]
pub struct KeywordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl KeywordStore {
    /// Open a store at `path`. Nothing is read or created until first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the primary file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Read the full document.
    ///
    /// A missing or unparseable file yields an empty document; the log is
    /// historical data and must not take the caller down.
    pub fn snapshot(&self) -> Result<StoreDocument> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load()
    }

    /// All catalog records in insertion order.
    pub fn keywords(&self) -> Result<Vec<KeywordRecord>> {
        Ok(self.snapshot()?.keywords)
    }

    /// All result log entries in insertion order.
    pub fn search_results(&self) -> Result<Vec<SearchResultRecord>> {
        Ok(self.snapshot()?.search_results)
    }

    fn load(&self) -> Result<StoreDocument> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Store file not found, starting empty");
                return Ok(StoreDocument::default());
            },
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<StoreDocument>(&raw) {
            Ok(mut doc) => {
                doc.reconcile_sequences();
                Ok(doc)
            },
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to parse store file, reinitializing"
                );
                Ok(StoreDocument::default())
            },
        }
    }

    fn persist(&self, doc: &StoreDocument) -> Result<()> {
        let write_error = |source| KeywordSweepError::StoreWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }

        let body = serde_json::to_vec_pretty(doc)?;
        let temp_path = self.temp_path();
        {
            let mut file = File::create(&temp_path).map_err(write_error)?;
            file.write_all(&body).map_err(write_error)?;
            file.sync_all().map_err(write_error)?;
        }
        fs::rename(&temp_path, &self.path).map_err(write_error)?;

        debug!(
            path = %self.path.display(),
            keywords = doc.keywords.len(),
            results = doc.search_results.len(),
            "Store file replaced"
        );
        Ok(())
    }

    /// Insert new keywords and update translations in one pass.
    ///
    /// The file is rewritten at most once, and only if a record changed.
    pub fn upsert_translations(&self, entries: &[ImportEntry]) -> Result<ImportSummary> {
        let mut summary = ImportSummary {
            total: entries.len(),
            ..ImportSummary::default()
        };
        if entries.is_empty() {
            return Ok(summary);
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load()?;
        let mut index = doc.keyword_index();
        let now = Utc::now();
        let mut changed = false;

        for entry in entries {
            let keyword = entry.keyword.trim();
            if keyword.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let translation = normalize_translation(entry.translation.as_deref());
            let Some(&position) = index.get(keyword) else {
                let position = doc.insert_keyword(keyword.to_string(), translation, now);
                index.insert(keyword.to_string(), position);
                summary.inserted += 1;
                changed = true;
                continue;
            };

            let existing = &mut doc.keywords[position];
            match translation {
                Some(t) if existing.translation.as_deref() != Some(t.as_str()) => {
                    existing.translation = Some(t);
                    existing.updated_at = now;
                    summary.updated += 1;
                    changed = true;
                },
                _ => summary.unchanged += 1,
            }
        }

        if changed {
            self.persist(&doc)?;
        }

        info!(
            total = summary.total,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            "Imported keyword translations"
        );
        Ok(summary)
    }

    /// Dedup keywords and split them into runnable tasks and recent skips.
    ///
    /// Uses [`RecencyPolicy::AnyFilters`].
    pub fn prepare_tasks<S: AsRef<str>>(&self, keywords: &[S], window_days: u32) -> Result<PreparedTasks> {
        self.prepare_tasks_with_policy(keywords, window_days, RecencyPolicy::default())
    }

    /// Dedup keywords and split them into runnable tasks and recent skips.
    ///
    /// Input is trimmed and deduplicated keeping first occurrences. Unknown
    /// keywords are added to the catalog in a single rewrite. A keyword whose
    /// latest counted result is no older than `window_days` is skipped.
    pub fn prepare_tasks_with_policy<S: AsRef<str>>(
        &self,
        keywords: &[S],
        window_days: u32,
        policy: RecencyPolicy,
    ) -> Result<PreparedTasks> {
        let mut seen = HashSet::new();
        let ordered: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty() && seen.insert(*k))
            .map(str::to_string)
            .collect();

        if ordered.is_empty() {
            return Err(KeywordSweepError::validation("Keyword list cannot be empty"));
        }
        InputValidator::validate_window_days(window_days)?;

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load()?;
        let mut index = doc.keyword_index();
        let now = Utc::now();
        let mut created = 0usize;

        for keyword in &ordered {
            if !index.contains_key(keyword) {
                let position = doc.insert_keyword(keyword.clone(), None, now);
                index.insert(keyword.clone(), position);
                created += 1;
            }
        }

        if created > 0 {
            self.persist(&doc)?;
        }

        let wanted: HashSet<&str> = ordered.iter().map(String::as_str).collect();
        let mut last_searched: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for record in &doc.search_results {
            if !wanted.contains(record.keyword.as_str()) || !policy.counts(record) {
                continue;
            }
            last_searched
                .entry(record.keyword.as_str())
                .and_modify(|at| *at = (*at).max(record.created_at))
                .or_insert(record.created_at);
        }

        let threshold = now - Duration::days(i64::from(window_days));
        let mut prepared = PreparedTasks::default();

        for keyword in &ordered {
            let record = &doc.keywords[index[keyword]];
            match last_searched.get(keyword.as_str()).copied() {
                Some(at) if at >= threshold => prepared.skipped.push(SkippedTask {
                    keyword_id: record.id,
                    keyword: record.keyword.clone(),
                    translation: record.translation.clone(),
                    last_searched_at: at,
                }),
                last => prepared.tasks.push(KeywordTask {
                    keyword_id: record.id,
                    keyword: record.keyword.clone(),
                    translation: record.translation.clone(),
                    last_searched_at: last,
                }),
            }
        }

        info!(
            requested = keywords.len(),
            unique = ordered.len(),
            created,
            tasks = prepared.tasks.len(),
            skipped = prepared.skipped.len(),
            window_days,
            "Prepared keyword tasks"
        );
        Ok(prepared)
    }

    /// Append one attempt to the result log.
    ///
    /// The keyword is resolved by id, then by text, and created if neither
    /// matches. Exactly one rewrite happens per call.
    pub fn record_result(&self, input: RecordResultInput) -> Result<SearchResultRecord> {
        let keyword = input.keyword.trim();
        if keyword.is_empty() && input.keyword_id.is_none() {
            return Err(KeywordSweepError::validation("Result keyword cannot be empty"));
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load()?;
        let now = Utc::now();
        let translation = normalize_translation(input.translation.as_deref());

        let found = input
            .keyword_id
            .and_then(|id| doc.keywords.iter().position(|k| k.id == id))
            .or_else(|| doc.keywords.iter().position(|k| k.keyword == keyword));

        let position = match found {
            Some(position) => {
                let existing = &mut doc.keywords[position];
                if let Some(t) = translation {
                    if existing.translation.as_deref() != Some(t.as_str()) {
                        existing.translation = Some(t);
                        existing.updated_at = now;
                    }
                }
                position
            },
            None => {
                if keyword.is_empty() {
                    return Err(KeywordSweepError::validation(format!(
                        "Unknown keyword id {} and no keyword text",
                        input.keyword_id.unwrap_or_default()
                    )));
                }
                doc.insert_keyword(keyword.to_string(), translation, now)
            },
        };

        let keyword_record = &doc.keywords[position];
        doc.sequences.search_result_id += 1;
        let record = SearchResultRecord {
            id: doc.sequences.search_result_id,
            keyword_id: keyword_record.id,
            keyword: keyword_record.keyword.clone(),
            translation: keyword_record.translation.clone(),
            search_count: input.search_count,
            top_sales_volume: input.top_sales_volume,
            top_review_count: input.top_review_count,
            meets_conditions: input.meets_conditions,
            duration_ms: input.duration_ms,
            error: input.error,
            zip_code: input.zip_code,
            filters: input.filters,
            created_at: now,
        };
        doc.search_results.push(record.clone());
        self.persist(&doc)?;

        debug!(keyword = %record.keyword, id = record.id, "Recorded search result");
        Ok(record)
    }
}

fn normalize_translation(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
