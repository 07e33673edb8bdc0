use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use keyword_sweep::config::AppConfig;
use keyword_sweep::executor::BatchObserver;
use keyword_sweep::file_writer::{read_import_file, read_keyword_file, write_results_csv};
use keyword_sweep::logging::{init_logging, OperationTimer};
use keyword_sweep::lookup::HttpLookup;
use keyword_sweep::models::SearchResult;
use keyword_sweep::service::SearchService;
use keyword_sweep::store::KeywordStore;
use keyword_sweep::validation::InputValidator;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store file, overrides `store.path`
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every keyword in a file and export the results
    Search {
        /// Keyword file, one keyword per line
        #[arg(short, long)]
        input: PathBuf,

        /// Results CSV (defaults to a timestamped name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Region for the lookup
        #[arg(short, long)]
        zip: Option<String>,

        /// Tasks per window (1-10)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Run the lookup without a visible browser
        #[arg(long, overrides_with = "no_headless")]
        headless: bool,

        /// Show the browser during lookups
        #[arg(long)]
        no_headless: bool,

        /// Search result count must be below this
        #[arg(long)]
        max_search_results: Option<i64>,

        /// Top monthly sales must be above this
        #[arg(long)]
        min_monthly_sales: Option<i64>,

        /// Top review count must be below this
        #[arg(long)]
        max_reviews: Option<i64>,

        /// Total rounds including the first
        #[arg(long)]
        max_rounds: Option<usize>,

        /// Skip keywords searched within this many days
        #[arg(long)]
        window_days: Option<u32>,
    },
    /// Show which keywords would run and which are skipped
    Prepare {
        /// Keyword file, one keyword per line
        #[arg(short, long)]
        input: PathBuf,

        /// Skip keywords searched within this many days
        #[arg(long)]
        window_days: Option<u32>,
    },
    /// Import translations from a `keyword,translation` CSV
    Import {
        /// CSV file, header optional
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(store) = &cli.store {
        config.store.path = store.to_string_lossy().into_owned();
    }

    // Initialize logging; the guard flushes the log file on exit
    let _guard = init_logging(&config.get_log_level(), &config.logging)?;

    info!("Starting keyword-sweep");

    match cli.command {
        Commands::Search {
            input,
            output,
            zip,
            concurrency,
            headless,
            no_headless,
            max_search_results,
            min_monthly_sales,
            max_reviews,
            max_rounds,
            window_days,
        } => {
            if let Some(zip) = zip {
                config.search.zip_code = InputValidator::sanitize_text(&zip);
            }
            if let Some(requested) = concurrency {
                let clamped = InputValidator::clamp_concurrency(requested);
                if clamped != requested {
                    warn!(requested, clamped, "Concurrency out of range, clamping");
                }
                config.search.concurrency = clamped;
            }
            if no_headless {
                config.search.headless = false;
            } else if headless {
                config.search.headless = true;
            }
            if let Some(value) = max_search_results {
                config.filters.max_search_results = value;
            }
            if let Some(value) = min_monthly_sales {
                config.filters.min_monthly_sales = value;
            }
            if let Some(value) = max_reviews {
                config.filters.max_reviews = value;
            }
            if let Some(value) = max_rounds {
                config.search.max_rounds = value;
            }
            if let Some(value) = window_days {
                config.search.window_days = value;
            }
            config.validate()?;

            search_keywords(&config, &input, output).await?;
        },
        Commands::Prepare { input, window_days } => {
            if let Some(value) = window_days {
                config.search.window_days = value;
            }
            config.validate()?;
            prepare_keywords(&config, &input)?;
        },
        Commands::Import { input } => import_translations(&config, &input)?,
    }

    Ok(())
}

/// Run every keyword in `input` and write the merged results
async fn search_keywords(config: &AppConfig, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let timer = OperationTimer::new("search");
    let keywords = read_keyword_file(input).with_context(|| format!("Failed to read {}", input.display()))?;
    info!(keywords = keywords.len(), input = %input.display(), "Loaded keyword list");

    let store = Arc::new(KeywordStore::open(&config.store.path));
    let lookup = HttpLookup::new(&config.lookup)?;
    let service = SearchService::new(store, Arc::new(lookup)).with_policy(config.recency_policy());

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight lookups");
            signal_token.cancel();
        }
    });

    let options = config.round_options();
    let run = service
        .run(keywords.as_slice(), config.search.window_days, &options, &ProgressObserver, &cancel)
        .await?;

    if !run.skipped.is_empty() {
        println!(
            "Skipped {} keyword(s) searched within the last {} days",
            run.skipped.len(),
            config.search.window_days
        );
    }

    if run.report.results.is_empty() {
        println!("No keywords to search");
        return Ok(());
    }

    let output = output.unwrap_or_else(default_output_path);
    write_results_csv(&run.report.results, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let summary = run.summary;
    println!("Results written to {}", output.display());
    println!(
        "{} keyword(s): {} succeeded, {} meet conditions, {} failed, {} cancelled ({} round(s), {:.1}s)",
        summary.total,
        summary.succeeded,
        summary.meets,
        summary.errors,
        summary.cancelled,
        run.report.rounds_executed,
        summary.duration.as_secs_f64()
    );

    if run.report.remaining_errors > 0 {
        warn!(
            remaining_errors = run.report.remaining_errors,
            "Some keywords still failed after all rounds"
        );
    }
    if run.persistence_failures > 0 {
        warn!(
            failures = run.persistence_failures,
            store = %config.store.path,
            "Some results could not be saved to the store"
        );
    }

    debug!(metrics = ?service.metrics().snapshot(), "Run metrics");
    timer.finish();
    Ok(())
}

/// Print the runnable and skipped keywords without searching
fn prepare_keywords(config: &AppConfig, input: &Path) -> Result<()> {
    let keywords = read_keyword_file(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let store = KeywordStore::open(&config.store.path);
    let prepared =
        store.prepare_tasks_with_policy(keywords.as_slice(), config.search.window_days, config.recency_policy())?;

    println!("Runnable ({}):", prepared.tasks.len());
    for task in &prepared.tasks {
        let last = task
            .last_searched_at
            .map_or_else(|| "never".to_string(), |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string());
        println!("  [{}] {} (last searched: {})", task.keyword_id, task.keyword, last);
    }

    println!("Skipped ({}):", prepared.skipped.len());
    for skipped in &prepared.skipped {
        println!(
            "  [{}] {} (searched {})",
            skipped.keyword_id,
            skipped.keyword,
            skipped.last_searched_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Merge translations from a CSV into the catalog
fn import_translations(config: &AppConfig, input: &Path) -> Result<()> {
    let entries = read_import_file(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let store = KeywordStore::open(&config.store.path);
    let summary = store.upsert_translations(&entries)?;

    println!(
        "Imported {} row(s): {} inserted, {} updated, {} unchanged, {} skipped",
        summary.total, summary.inserted, summary.updated, summary.unchanged, summary.skipped
    );
    Ok(())
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "keyword-sweep-results-{}.csv",
        Local::now().format("%Y%m%d-%H%M%S")
    ))
}

/// Logs progress as keywords and rounds go by
struct ProgressObserver;

impl BatchObserver for ProgressObserver {
    fn on_task_start(&self, keyword: &str, index: usize, total: usize) {
        info!("[{}/{}] Searching \"{}\"", index, total, keyword);
    }

    fn on_round_start(&self, round: usize, keywords: &[String]) {
        info!("Round {}: retrying {} failed keyword(s)", round, keywords.len());
    }

    fn on_round_complete(&self, round: usize, round_results: &[SearchResult], aggregate: &[SearchResult]) {
        let failed = round_results.iter().filter(|r| r.is_failed()).count();
        let meets = aggregate.iter().filter(|r| r.meets_conditions).count();
        info!(
            "Round {} done: {} searched, {} failed, {} meeting conditions so far",
            round,
            round_results.len(),
            failed,
            meets
        );
    }
}
