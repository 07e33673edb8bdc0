use crate::error::{KeywordSweepError, Result};
use crate::executor::BatchOptions;
use crate::models::FilterThresholds;
use crate::rounds::{ResultOrder, RoundOptions};
use crate::store::RecencyPolicy;
use crate::validation::InputValidator;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub filters: FiltersConfig,
    pub lookup: LookupConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub zip_code: String,
    pub headless: bool,
    pub concurrency: usize,
    pub max_rounds: usize,
    pub window_days: u32,
    pub retry_delays_ms: Vec<u64>,
    pub window_delay_ms: u64,
    /// "any" or "matching"
    pub recency_policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    pub max_search_results: i64,
    pub min_monthly_sales: i64,
    pub max_reviews: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                path: "data/database.json".to_string(),
            },
            search: SearchConfig {
                zip_code: String::new(),
                headless: true,
                concurrency: 1,
                max_rounds: 2,
                window_days: 30,
                retry_delays_ms: vec![3000, 6000, 10_000],
                window_delay_ms: 2000,
                recency_policy: "any".to_string(),
            },
            filters: FiltersConfig {
                max_search_results: 500,
                min_monthly_sales: 500,
                max_reviews: 100,
            },
            lookup: LookupConfig {
                endpoint: "http://localhost:3000/api/search".to_string(),
                timeout_secs: 300,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from multiple sources with precedence
    ///
    /// Defaults, then `config/default`, `config/local`, `keyword-sweep`
    /// (all optional), then `extra` if given, then `KEYWORD_SWEEP__*`
    /// environment variables.
    pub fn load_from(extra: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let retry_delays: Vec<i64> = defaults
            .search
            .retry_delays_ms
            .iter()
            .map(|ms| i64::try_from(*ms).unwrap_or(i64::MAX))
            .collect();

        let mut builder = Config::builder()
            .set_default("store.path", defaults.store.path)?
            .set_default("search.zip_code", defaults.search.zip_code)?
            .set_default("search.headless", defaults.search.headless)?
            .set_default("search.concurrency", 1_i64)?
            .set_default("search.max_rounds", 2_i64)?
            .set_default("search.window_days", 30_i64)?
            .set_default("search.retry_delays_ms", retry_delays)?
            .set_default("search.window_delay_ms", 2000_i64)?
            .set_default("search.recency_policy", defaults.search.recency_policy)?
            .set_default("filters.max_search_results", defaults.filters.max_search_results)?
            .set_default("filters.min_monthly_sales", defaults.filters.min_monthly_sales)?
            .set_default("filters.max_reviews", defaults.filters.max_reviews)?
            .set_default("lookup.endpoint", defaults.lookup.endpoint)?
            .set_default("lookup.timeout_secs", 300_i64)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            // Add config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("keyword-sweep").required(false));

        if let Some(path) = extra {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("KEYWORD_SWEEP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("search.retry_delays_ms"),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.path.trim().is_empty() {
            return Err(KeywordSweepError::InvalidConfig(
                "store.path cannot be empty".to_string(),
            ));
        }

        InputValidator::validate_concurrency(self.search.concurrency).map_err(invalid)?;
        InputValidator::validate_max_rounds(self.search.max_rounds).map_err(invalid)?;
        InputValidator::validate_window_days(self.search.window_days).map_err(invalid)?;
        InputValidator::validate_filters(&self.filter_thresholds()).map_err(invalid)?;
        InputValidator::validate_retry_delays(&self.retry_delays()).map_err(invalid)?;

        let valid_policies = ["any", "matching"];
        if !valid_policies.contains(&self.search.recency_policy.as_str()) {
            return Err(KeywordSweepError::InvalidConfig(format!(
                "Invalid recency policy: {}. Must be one of: {:?}",
                self.search.recency_policy, valid_policies
            )));
        }

        if self.lookup.endpoint.trim().is_empty() {
            return Err(KeywordSweepError::InvalidConfig(
                "lookup.endpoint cannot be empty".to_string(),
            ));
        }
        if self.lookup.timeout_secs == 0 {
            return Err(KeywordSweepError::InvalidConfig(
                "lookup.timeout_secs must be greater than 0".to_string(),
            ));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(KeywordSweepError::InvalidConfig(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(KeywordSweepError::InvalidConfig(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format, valid_formats
            )));
        }

        Ok(())
    }

    /// Filter thresholds from the `filters` section
    #[must_use]
    pub const fn filter_thresholds(&self) -> FilterThresholds {
        FilterThresholds {
            max_search_results: self.filters.max_search_results,
            min_monthly_sales: self.filters.min_monthly_sales,
            max_reviews: self.filters.max_reviews,
        }
    }

    /// Backoff schedule from `search.retry_delays_ms`
    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.search
            .retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// Recency policy from `search.recency_policy`
    #[must_use]
    pub fn recency_policy(&self) -> RecencyPolicy {
        match self.search.recency_policy.as_str() {
            "matching" => RecencyPolicy::MatchingFilters(self.filter_thresholds()),
            _ => RecencyPolicy::AnyFilters,
        }
    }

    /// Executor options built from the `search` and `filters` sections
    #[must_use]
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.search.concurrency,
            zip_code: self.search.zip_code.clone(),
            filters: self.filter_thresholds(),
            headless: self.search.headless,
            retry_delays: self.retry_delays(),
            window_delay: Duration::from_millis(self.search.window_delay_ms),
        }
    }

    /// Round controller options
    #[must_use]
    pub fn round_options(&self) -> RoundOptions {
        RoundOptions {
            max_rounds: self.search.max_rounds,
            batch: self.batch_options(),
            order: ResultOrder::TaskOrder,
        }
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

fn invalid(err: KeywordSweepError) -> KeywordSweepError {
    match err {
        KeywordSweepError::Validation(message) => KeywordSweepError::InvalidConfig(message),
        other => other,
    }
}
