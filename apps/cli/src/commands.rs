//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;
use tracing::{info, warn};

use stacksift_browser::BrowserManager;
use stacksift_core::{RateLimiter, SearchProgress, SearchScraper};
use stacksift_extractor::DataExtractor;
use stacksift_shared::{
    AppConfig, BatchSearchResult, RateLimitSettings, SearchResult, init_config, load_config,
};
use stacksift_storage::JsonWriter;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// stacksift: find Substack posts by keyword.
#[derive(Parser)]
#[command(
    name = "stacksift",
    version,
    about = "Search Substack for posts matching keywords and save them as JSON.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search for posts matching one or more keywords.
    Search {
        /// Keywords to search for.
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Maximum posts per keyword (defaults to search.default_limit).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output directory for JSON files (defaults to output.dir).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show the browser window.
        #[arg(long)]
        headed: bool,

        /// Skip visiting each post for its full content.
        #[arg(long)]
        no_content: bool,

        /// Write all posts to a single combined file.
        #[arg(long)]
        combine: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "stacksift=info",
        1 => "stacksift=debug",
        _ => "stacksift=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Search {
            keywords,
            limit,
            output,
            headed,
            no_content,
            combine,
        } => {
            let options = SearchOptions {
                keywords,
                limit,
                output,
                headed,
                fetch_content: no_content.then_some(false),
                combine,
            };
            cmd_search(options).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// search
// ---------------------------------------------------------------------------

struct SearchOptions {
    keywords: Vec<String>,
    limit: Option<usize>,
    output: Option<PathBuf>,
    headed: bool,
    fetch_content: Option<bool>,
    combine: bool,
}

async fn cmd_search(options: SearchOptions) -> Result<()> {
    let mut config = load_config()?;
    let limit = options.limit.unwrap_or(config.search.default_limit);
    if limit == 0 || limit > config.search.max_limit {
        return Err(eyre!(
            "--limit must be between 1 and {} (got {limit})",
            config.search.max_limit
        ));
    }
    if options.headed {
        config.browser.headless = false;
    }
    let output_dir = options
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.output.dir));
    let fetch_content = options.fetch_content.unwrap_or(config.search.fetch_content);

    let writer = JsonWriter::new(&output_dir)?;

    println!();
    println!("  Keywords:     {}", options.keywords.join(", "));
    println!("  Limit:        {limit} posts per keyword");
    println!("  Full content: {}", if fetch_content { "yes" } else { "no" });
    println!("  Output:       {}", output_dir.display());
    println!();

    info!(
        keywords = options.keywords.len(),
        limit,
        fetch_content,
        headless = config.browser.headless,
        "starting search run"
    );

    let manager = Arc::new(BrowserManager::new(config.browser.headless));
    let outcome = run_searches(&config, &manager, &options, limit, fetch_content).await;

    if let Err(e) = manager.stop().await {
        warn!(error = %e, "browser shutdown failed");
    }

    let batch = outcome?;
    write_results(&writer, &batch, options.combine)?;

    println!();
    println!("  Complete!");
    println!("  Keywords: {}", batch.keywords.len());
    println!("  Posts:    {}", batch.total_results);
    println!("  Time:     {:.1}s", batch.duration_seconds);
    println!();

    Ok(())
}

async fn run_searches(
    config: &AppConfig,
    manager: &Arc<BrowserManager>,
    options: &SearchOptions,
    limit: usize,
    fetch_content: bool,
) -> Result<BatchSearchResult> {
    let started = Instant::now();
    manager.start().await?;

    let limiter = Arc::new(RateLimiter::from(&RateLimitSettings::from(config)));
    let extractor = Arc::new(DataExtractor::new());
    let scraper = SearchScraper::new(manager.clone(), limiter, extractor, config);

    let reporter = CliProgress::new();
    let results = scraper
        .search_multiple_with_progress(&options.keywords, limit, Some(fetch_content), &reporter)
        .await;
    reporter.finish();

    Ok(BatchSearchResult::new(results, started.elapsed()))
}

fn write_results(writer: &JsonWriter, batch: &BatchSearchResult, combine: bool) -> Result<()> {
    if combine {
        if batch.results.is_empty() {
            return Ok(());
        }
        let path = writer.write_all_posts_combined(&batch.results, None)?;
        println!("  Combined results saved to: {}", path.display());
        return Ok(());
    }

    for result in &batch.results {
        let path = writer.write_search_result(result)?;
        println!("  Saved: {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl SearchProgress for CliProgress {
    fn keyword_started(&self, keyword: &str, index: usize, total: usize) {
        self.spinner
            .set_message(format!("Searching [{}/{total}] {keyword}", index + 1));
    }

    fn keyword_finished(&self, result: &SearchResult) {
        self.spinner.println(format!(
            "  {:<24} {:>4} posts  {:>7.2}s",
            format!("'{}'", result.keyword),
            result.total_results,
            result.duration_seconds
        ));
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
