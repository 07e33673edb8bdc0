//! The external lookup the executor calls for every keyword.
//!
//! A lookup never fails in the `Result` sense: ordinary failures come back in
//! [`LookupOutcome::error`] so the executor can decide whether to retry.

use crate::config::LookupConfig;
use crate::error::Result;
use crate::models::{FilterThresholds, LookupOutcome};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Something that can look up one keyword
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeywordLookup: Send + Sync {
    /// Look up `keyword` in `region` and report the numbers the filters need.
    async fn lookup(
        &self,
        keyword: &str,
        region: &str,
        filters: &FilterThresholds,
        headless: bool,
    ) -> LookupOutcome;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    keyword: &'a str,
    zip_code: &'a str,
    headless: bool,
    filters: &'a FilterThresholds,
}

#[derive(Deserialize)]
struct SearchResponse {
    success: bool,
    data: Option<SearchData>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    search_results: Option<i64>,
    max_month_sales: Option<i64>,
    max_reviews: Option<i64>,
    duration: Option<u64>,
}

/// Lookup backed by a remote search service
pub struct HttpLookup {
    client: Client,
    endpoint: String,
}

impl HttpLookup {
    /// Build a client for the configured endpoint.
    pub fn new(config: &LookupConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    async fn request(
        &self,
        keyword: &str,
        region: &str,
        filters: &FilterThresholds,
        headless: bool,
    ) -> std::result::Result<SearchData, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest {
                keyword,
                zip_code: region,
                headless,
                filters,
            })
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response body: {e}"))?;

        interpret_response(status, &body)
    }
}

/// Turn a status and raw body into data or the server's error message.
///
/// Error statuses still carry a JSON envelope from the search service, so its
/// `error` wins over the bare status code when it can be parsed.
fn interpret_response(status: StatusCode, body: &str) -> std::result::Result<SearchData, String> {
    let parsed = serde_json::from_str::<SearchResponse>(body);

    if !status.is_success() {
        return match parsed {
            Ok(SearchResponse {
                error: Some(error), ..
            }) if !error.trim().is_empty() => Err(error),
            _ => Err(format!("HTTP error: {}", status.as_u16())),
        };
    }

    match parsed.map_err(|e| format!("Invalid response body: {e}"))? {
        SearchResponse {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        SearchResponse { error, .. } => {
            Err(error.unwrap_or_else(|| "Server returned no data".to_string()))
        },
    }
}

#[async_trait]
impl KeywordLookup for HttpLookup {
    async fn lookup(
        &self,
        keyword: &str,
        region: &str,
        filters: &FilterThresholds,
        headless: bool,
    ) -> LookupOutcome {
        let started = Instant::now();
        let outcome = match self.request(keyword, region, filters, headless).await {
            Ok(data) => LookupOutcome {
                search_count: data.search_results,
                top_sales_volume: data.max_month_sales,
                top_review_count: data.max_reviews,
                duration_ms: data
                    .duration
                    .or_else(|| u64::try_from(started.elapsed().as_millis()).ok()),
                error: None,
            },
            Err(message) => LookupOutcome::failure(message),
        };

        debug!(keyword, error = ?outcome.error, "Lookup finished");
        outcome
    }
}
