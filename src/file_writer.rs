//! File reading and writing for the command-line front end.
//!
//! Keyword lists are plain text, one keyword per line. Translation imports
//! are `keyword,translation` CSV. Results are exported as CSV with a UTF-8
//! byte order mark so spreadsheet tools pick the right encoding.

use crate::error::{KeywordSweepError, Result};
use crate::models::{ImportEntry, SearchResult, SearchStatus};
use crate::validation::InputValidator;
use csv::{ReaderBuilder, Writer};
use std::collections::HashSet;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Placeholder for unknown numbers in exported files
const MISSING: &str = "-";

/// Read a keyword list, one per line.
///
/// Lines are trimmed, blank lines dropped and duplicates removed keeping the
/// first occurrence.
///
/// # Errors
///
/// Returns a validation error if the file holds no keywords or a line is not
/// a usable keyword.
pub fn read_keyword_file(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        InputValidator::validate_keyword(line)?;
        if seen.insert(line) {
            keywords.push(line.to_string());
        }
    }

    if keywords.is_empty() {
        return Err(KeywordSweepError::validation(format!(
            "Keyword file {} is empty",
            path.display()
        )));
    }

    Ok(keywords)
}

/// Read translation import rows from CSV.
///
/// The first column is the keyword and the optional second column the
/// translation. A first row reading `keyword` is treated as a header.
pub fn read_import_csv<R: Read>(reader: R) -> Result<Vec<ImportEntry>> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut entries = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let keyword = record.get(0).unwrap_or_default().trim_start_matches('\u{feff}');
        if row == 0 && keyword.eq_ignore_ascii_case("keyword") {
            continue;
        }

        entries.push(ImportEntry::new(keyword, record.get(1)));
    }

    Ok(entries)
}

/// Read translation import rows from a CSV file.
pub fn read_import_file(path: &Path) -> Result<Vec<ImportEntry>> {
    read_import_csv(File::open(path)?)
}

/// Write results to a CSV file, creating parent directories as needed.
pub fn write_results_csv(results: &[SearchResult], file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }

    let file = File::create(file_path)?;
    write_results(results, BufWriter::new(file))
}

/// Write results as CSV to any writer.
///
/// Includes header row: `Keyword, Translation, Search Results, Top Monthly
/// Sales, Top Reviews, Meets Conditions, Duration (s), Status, Error`
pub fn write_results<W: Write>(results: &[SearchResult], mut writer: W) -> Result<()> {
    writer.write_all(UTF8_BOM)?;
    let mut csv_writer = Writer::from_writer(writer);

    csv_writer.write_record([
        "Keyword",
        "Translation",
        "Search Results",
        "Top Monthly Sales",
        "Top Reviews",
        "Meets Conditions",
        "Duration (s)",
        "Status",
        "Error",
    ])?;

    for result in results {
        let search_count = format_number(result.search_count);
        let top_sales = format_number(result.top_sales_volume);
        let top_reviews = format_number(result.top_review_count);
        let duration = result
            .duration_ms
            .map_or_else(|| MISSING.to_string(), format_seconds);

        csv_writer.write_record([
            result.keyword.as_str(),
            result.translation.as_deref().unwrap_or_default(),
            search_count.as_str(),
            top_sales.as_str(),
            top_reviews.as_str(),
            if result.meets_conditions { "yes" } else { "no" },
            duration.as_str(),
            status_label(result),
            result.error.as_deref().unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

fn format_number(value: Option<i64>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| v.to_string())
}

#[allow(clippy::cast_precision_loss)]
fn format_seconds(ms: u64) -> String {
    format!("{:.2}", ms as f64 / 1000.0)
}

const fn status_label(result: &SearchResult) -> &'static str {
    match result.status {
        SearchStatus::Succeeded => "succeeded",
        SearchStatus::Failed => "failed",
        SearchStatus::Cancelled => "cancelled",
    }
}
