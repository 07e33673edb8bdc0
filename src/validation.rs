use crate::error::{KeywordSweepError, Result};
use crate::models::FilterThresholds;
use std::time::Duration;

/// Largest window the executor will run at once
pub const MAX_CONCURRENCY: usize = 10;

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a single keyword
    pub fn validate_keyword(keyword: &str) -> Result<()> {
        if keyword.trim().is_empty() {
            return Err(KeywordSweepError::validation("Keyword cannot be empty"));
        }

        if keyword.len() > 500 {
            return Err(KeywordSweepError::validation(
                "Keyword too long (max 500 characters)",
            ));
        }

        if keyword.contains('\0') || keyword.contains('\r') || keyword.contains('\n') {
            return Err(KeywordSweepError::validation(
                "Keyword contains invalid characters",
            ));
        }

        Ok(())
    }

    /// Validate the executor's window size
    pub fn validate_concurrency(concurrency: usize) -> Result<()> {
        if concurrency == 0 {
            return Err(KeywordSweepError::validation(
                "Concurrency must be greater than 0",
            ));
        }

        if concurrency > MAX_CONCURRENCY {
            return Err(KeywordSweepError::validation(format!(
                "Concurrency too large (max {MAX_CONCURRENCY})"
            )));
        }

        Ok(())
    }

    /// Clamp a requested concurrency into the supported range
    #[must_use]
    pub fn clamp_concurrency(concurrency: usize) -> usize {
        concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Validate filter thresholds
    pub fn validate_filters(filters: &FilterThresholds) -> Result<()> {
        let fields = [
            ("maxSearchResults", filters.max_search_results),
            ("minMonthlySales", filters.min_monthly_sales),
            ("maxReviews", filters.max_reviews),
        ];

        for (name, value) in fields {
            if value < 0 {
                return Err(KeywordSweepError::validation(format!(
                    "Filter {name} cannot be negative (got {value})"
                )));
            }
        }

        Ok(())
    }

    /// Validate the number of rounds
    pub fn validate_max_rounds(max_rounds: usize) -> Result<()> {
        if max_rounds == 0 {
            return Err(KeywordSweepError::validation(
                "At least one round is required",
            ));
        }

        if max_rounds > 20 {
            return Err(KeywordSweepError::validation("Too many rounds (max 20)"));
        }

        Ok(())
    }

    /// Validate the recency window
    pub fn validate_window_days(window_days: u32) -> Result<()> {
        if window_days > 3650 {
            return Err(KeywordSweepError::validation(
                "Recency window too large (max 3650 days)",
            ));
        }

        Ok(())
    }

    /// Validate a retry backoff schedule
    pub fn validate_retry_delays(delays: &[Duration]) -> Result<()> {
        if delays.len() > 10 {
            return Err(KeywordSweepError::validation(
                "Too many retry delays (max 10)",
            ));
        }

        if let Some(delay) = delays.iter().find(|d| **d > Duration::from_secs(600)) {
            return Err(KeywordSweepError::validation(format!(
                "Retry delay too long ({}s, max 600s)",
                delay.as_secs()
            )));
        }

        if delays.windows(2).any(|pair| pair[0] > pair[1]) {
            tracing::warn!(?delays, "Retry delays are not ascending");
        }

        Ok(())
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string()
    }
}
