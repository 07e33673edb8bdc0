//! Keyword Sweep - Keyword Search Orchestration and Persistence
//!
//! A Rust library for running marketplace keyword lookups in bounded batches,
//! retrying failures round by round and keeping a durable catalog of keywords
//! and past results.
//!
//! # Features
//!
//! - JSON-backed keyword catalog with atomic writes
//! - Recency window so recently searched keywords are skipped
//! - Windowed concurrency with per-task backoff and cooperative cancellation
//! - Round-based retry of the failing subset
//! - CSV import of translations and CSV export of results

/// Configuration management
pub mod config;
/// Error types
pub mod error;
/// Batch execution with retry
pub mod executor;
/// Keyword list, import and export files
pub mod file_writer;
/// Logging setup and utilities
pub mod logging;
/// External keyword lookup
pub mod lookup;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Round-based retry
pub mod rounds;
/// Prepare, run and record in one call
pub mod service;
/// Persistent keyword catalog and result log
pub mod store;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use error::{KeywordSweepError, Result};
pub use executor::{BatchExecutor, BatchObserver, BatchOptions, NoopObserver};
pub use lookup::{HttpLookup, KeywordLookup};
pub use models::{FilterThresholds, KeywordTask, SearchResult, SearchStatus};
pub use rounds::{RoundController, RoundOptions, RoundReport};
pub use service::{SearchRun, SearchService};
pub use store::{KeywordStore, RecencyPolicy};
