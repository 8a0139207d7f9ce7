//! id-sweep main entry point
//!
//! This is the command-line interface for the id-sweep crawler.

use anyhow::{bail, Context};
use clap::Parser;
use id_sweep::config::{load_config_with_hash, Config};
use id_sweep::crawler::{registry_from_config, StartCrawl};
use id_sweep::output::{
    load_statistics, print_job, print_statistics, print_summary, render_matches, render_record,
};
use id_sweep::state::CrawlMode;
use id_sweep::storage::{open_storage, Storage};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// id-sweep: a circuit-breaking crawler for ID-indexed resources
///
/// id-sweep walks a range of integer IDs against an HTTP API, stores every
/// record it finds, remembers IDs that do not exist, and stops on its own
/// once it runs past the end of the data.
#[derive(Parser, Debug)]
#[command(name = "id-sweep")]
#[command(version)]
#[command(about = "A circuit-breaking crawler for ID-indexed resources", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Re-fetch every ID that is not known to be absent
    #[arg(long, conflicts_with = "missing")]
    fresh: bool,

    /// Only fetch IDs with neither a stored record nor an absence marker
    #[arg(long, conflicts_with = "fresh")]
    missing: bool,

    /// Override the first ID of the range
    #[arg(long)]
    start_id: Option<i64>,

    /// Override the last ID of the range
    #[arg(long)]
    end_id: Option<i64>,

    /// Override the maximum requests per second
    #[arg(long)]
    max_rps: Option<u32>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, group = "action")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, group = "action")]
    stats: bool,

    /// Show the persisted state of a job and exit
    #[arg(long, value_name = "JOB", group = "action")]
    status: Option<i64>,

    /// Request cancellation of a running job and exit
    #[arg(long, value_name = "JOB", group = "action")]
    cancel: Option<i64>,

    /// Print a stored record as JSON and exit
    #[arg(long, value_name = "ID", group = "action")]
    record: Option<i64>,

    /// Print every stored record whose field equals the value and exit
    #[arg(long, value_name = "FIELD=VALUE", group = "action")]
    find: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load .env before the token variable is read
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(job_id) = cli.status {
        handle_status(&config, job_id)
    } else if let Some(job_id) = cli.cancel {
        handle_cancel(&config, job_id)
    } else if let Some(id) = cli.record {
        handle_record(&config, id)
    } else if let Some(query) = cli.find.as_deref() {
        handle_find(&config, query)
    } else {
        handle_crawl(config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("id_sweep=info,warn"),
            1 => EnvFilter::new("id_sweep=debug,info"),
            2 => EnvFilter::new("id_sweep=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if cli.fresh {
        config.crawler.mode = CrawlMode::Fresh;
    } else if cli.missing {
        config.crawler.mode = CrawlMode::Missing;
    }
    if let Some(start_id) = cli.start_id {
        config.crawler.start_id = start_id;
    }
    if let Some(end_id) = cli.end_id {
        config.crawler.end_id = end_id;
    }
    if let Some(max_rps) = cli.max_rps {
        config.crawler.max_requests_per_second = max_rps;
    }
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    id_sweep::config::validate_crawler_config(&config.crawler)?;

    println!("=== id-sweep Dry Run ===\n");

    let crawler = &config.crawler;
    println!("Crawler Configuration:");
    println!("  Range: {}..={}", crawler.start_id, crawler.end_id);
    println!("  Mode: {}", crawler.mode);
    println!("  Max requests/second: {}", crawler.max_requests_per_second);
    println!(
        "  Consecutive invalid threshold: {}",
        crawler.consecutive_invalid_threshold
    );
    println!("  Refresh interval: {}", crawler.refresh_interval);
    println!("  Throttle backoff: {:?}", crawler.throttle_backoff());
    println!("  Scheduling: {:?}", crawler.scheduling);
    println!(
        "  Reset on transient error: {}",
        crawler.reset_on_transient_error
    );

    println!("\nAPI:");
    println!("  Base URL: {}", config.api.base_url);
    if let Some(language) = &config.api.language {
        println!("  Language: {}", language);
    }
    println!("  Request timeout: {}s", config.api.request_timeout_secs);
    match config.api.resolve_token() {
        Ok(_) => println!("  Token: configured"),
        Err(e) => println!("  Token: missing ({})", e),
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would scan {} IDs",
        crawler.end_id - crawler.start_id + 1
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --status mode: prints a job snapshot
fn handle_status(config: &Config, job_id: i64) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let job = storage
        .get_job(job_id)
        .with_context(|| format!("Could not load job {}", job_id))?;

    println!("=== Job {} ===\n", job_id);
    print_job(&job);
    Ok(())
}

/// Handles the --cancel mode: sets the persisted cancellation flag
fn handle_cancel(config: &Config, job_id: i64) -> anyhow::Result<()> {
    let mut storage = open_storage(Path::new(&config.output.database_path))?;
    let job = storage
        .get_job(job_id)
        .with_context(|| format!("Could not load job {}", job_id))?;

    if job.state.is_terminal() {
        println!("Job {} already finished as {}", job_id, job.state);
        return Ok(());
    }

    storage.set_cancelled(job_id)?;
    println!("✓ Cancellation requested for job {}", job_id);
    Ok(())
}

/// Handles the --record mode: prints a stored record
fn handle_record(config: &Config, id: i64) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    match render_record(&storage, id)? {
        Some(json) => println!("{}", json),
        None => bail!("No record stored for ID {}", id),
    }
    Ok(())
}

/// Handles the --find mode: prints matching records
fn handle_find(config: &Config, query: &str) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let (count, json) = render_matches(&storage, query)?;
    if count == 0 {
        bail!("No record matches {}", query);
    }
    println!("{}", json);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let registry = registry_from_config(&config)?;

    let handle = registry.start_crawl(StartCrawl {
        mode: config.crawler.mode.to_string(),
        start_id: config.crawler.start_id,
        end_id: config.crawler.end_id,
        max_requests_per_second: config.crawler.max_requests_per_second,
    })?;
    tracing::info!(
        "Crawling IDs {}..={} as job {} (Ctrl-C to stop)",
        config.crawler.start_id,
        config.crawler.end_id,
        handle.job_id
    );

    let wait = registry.wait(handle.job_id);
    tokio::pin!(wait);

    let summary = tokio::select! {
        result = &mut wait => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received, stopping job {}", handle.job_id);
            if let Err(e) = registry.cancel_all() {
                tracing::error!("Failed to persist cancellation: {}", e);
            }
            wait.await?
        }
    };

    print_summary(&summary);
    Ok(())
}
