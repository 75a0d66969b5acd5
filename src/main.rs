//! Listing Harvester main entry point
//!
//! This is the command-line interface for the resumable listing crawler.

use anyhow::Context;
use clap::Parser;
use listing_harvester::config::{load_config_with_hash, Config};
use listing_harvester::ledger::{CrawlLedger, LedgerOptions, RunStatus};
use listing_harvester::media::MediaFetcher;
use listing_harvester::orchestrator::{CrawlOrchestrator, OrchestratorSettings};
use listing_harvester::output::{format_attempt, load_statistics, print_statistics};
use listing_harvester::pipeline::{build_http_client, build_pipelines};
use listing_harvester::storage::RecordStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Listing Harvester: a resumable multi-source listing crawler
///
/// Crawls every configured listing source concurrently, records the outcome
/// of each item in a durable ledger, and skips completed items on restart.
#[derive(Parser, Debug)]
#[command(name = "listing-harvester")]
#[command(version = "1.0.0")]
#[command(about = "A resumable multi-source listing crawler", long_about = None)]
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

    /// Forget every previous attempt and stored record before crawling
    #[arg(long)]
    fresh: bool,

    /// Validate config and show the configured sources without crawling
    #[arg(long, conflicts_with_all = ["stats", "inspect"])]
    dry_run: bool,

    /// Show ledger statistics and exit
    #[arg(long, conflicts_with_all = ["dry_run", "inspect"])]
    stats: bool,

    /// Show the ledger record of one item and exit
    #[arg(long, num_args = 2, value_names = ["SOURCE", "REFERENCE"])]
    inspect: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(args) = &cli.inspect {
        handle_inspect(&config, &args[0], &args[1])?;
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_harvester=info,warn"),
            1 => EnvFilter::new("listing_harvester=debug,info"),
            2 => EnvFilter::new("listing_harvester=trace,debug"),
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

fn ledger_options(config: &Config) -> LedgerOptions {
    LedgerOptions {
        flush_every: config.orchestrator.flush_every,
        retry_failed: config.orchestrator.retry_failed,
    }
}

fn open_ledger(config: &Config) -> anyhow::Result<CrawlLedger> {
    let path = Path::new(&config.output.ledger_path);
    CrawlLedger::open(path, ledger_options(config))
        .with_context(|| format!("failed to open ledger {}", path.display()))
}

/// Opens the ledger for viewing; None if no crawl has created it yet
fn open_ledger_read_only(config: &Config) -> anyhow::Result<Option<CrawlLedger>> {
    let path = Path::new(&config.output.ledger_path);
    if !path.exists() {
        println!("No ledger at {} yet", path.display());
        return Ok(None);
    }
    let ledger = CrawlLedger::open_read_only(path, ledger_options(config))
        .with_context(|| format!("failed to open ledger {}", path.display()))?;
    Ok(Some(ledger))
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Listing Harvester Dry Run ===\n");

    println!("Orchestrator:");
    println!(
        "  Max advance attempts: {}",
        config.orchestrator.max_advance_attempts
    );
    println!("  Retry delay: {}ms", config.orchestrator.retry_delay_ms);
    println!(
        "  Request timeout: {}s",
        config.orchestrator.request_timeout_secs
    );
    println!("  Flush every: {} writes", config.orchestrator.flush_every);
    println!("  Retry failed items: {}", config.orchestrator.retry_failed);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);

    println!("\nOutput:");
    println!("  Ledger: {}", config.output.ledger_path);
    println!("  Records: {}", config.output.records_path);
    println!("  Images: {}", config.output.images_dir);

    println!("\nMedia:");
    println!("  Enabled: {}", config.media.enabled);
    println!(
        "  Max concurrent downloads: {}",
        config.media.max_concurrent_downloads
    );

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        println!("  - {} ({:?}): {}", source.name, source.kind, source.url);
        for (field, selector) in &source.fields {
            println!("    * {} <- {}", field, selector);
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling {} sources", config.sources.len());
}

/// Handles the --stats mode: shows per-source ledger statistics
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Ledger: {}\n", config.output.ledger_path);

    let Some(ledger) = open_ledger_read_only(config)? else {
        return Ok(());
    };
    let stats = load_statistics(&ledger)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --inspect mode: shows the ledger record of one item
fn handle_inspect(config: &Config, source: &str, reference: &str) -> anyhow::Result<()> {
    let Some(ledger) = open_ledger_read_only(config)? else {
        return Ok(());
    };
    println!(
        "{}",
        format_attempt(source, reference, ledger.lookup(source, reference).as_ref())
    );
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    let ledger = Arc::new(open_ledger(&config)?);
    let store = Arc::new(
        RecordStore::open(
            Path::new(&config.output.records_path),
            Path::new(&config.output.images_dir),
        )
        .with_context(|| format!("failed to open {}", config.output.records_path))?,
    );

    if fresh {
        tracing::info!("Starting fresh crawl (clearing {} ledger entries)", ledger.len());
        ledger.clear().context("failed to clear ledger")?;
        store.clear().context("failed to clear stored records")?;
    } else {
        tracing::info!("Resuming with {} ledger entries", ledger.len());
    }

    let pipelines = build_pipelines(&config).context("failed to build source pipelines")?;
    tracing::info!("Configured {} sources", pipelines.len());

    let mut orchestrator = CrawlOrchestrator::new(
        Arc::clone(&ledger),
        store.clone(),
        OrchestratorSettings::from_config(&config.orchestrator),
    );
    if config.media.enabled {
        let client = build_http_client(
            &config.user_agent,
            Duration::from_secs(config.orchestrator.request_timeout_secs),
        )?;
        let media = MediaFetcher::new(
            client,
            store.clone(),
            config.media.max_concurrent_downloads as usize,
        );
        orchestrator = orchestrator.with_media(Arc::new(media));
    }

    let stop = orchestrator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current items");
            stop.trigger();
        }
    });

    let run_id = ledger.begin_run(config_hash)?;
    let summary = orchestrator.run(pipelines).await;

    let status = if orchestrator.stop_signal().is_triggered() {
        RunStatus::Interrupted
    } else {
        RunStatus::Completed
    };
    ledger.finish_run(run_id, status)?;

    println!("{}", summary);
    Ok(())
}
