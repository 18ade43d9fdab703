//! Redlist main entry point
//!
//! This is the command-line interface for the Redlist community crawler.

use anyhow::Context;
use clap::Parser;
use redlist::config::{load_config_with_hash, Config};
use redlist::crawler::crawl;
use redlist::output::{load_statistics, print_statistics};
use redlist::store::NdjsonStore;
use redlist::RedlistError;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Largest communities listed by --stats
const STATS_TOP: usize = 20;

/// Redlist: a polite community-listing crawler
///
/// Redlist discovers communities from public listings, verifies each one
/// against the site's metadata endpoints, and appends the results to an
/// NDJSON record log that survives crashes and restarts.
#[derive(Parser, Debug)]
#[command(name = "redlist")]
#[command(version = "1.0.0")]
#[command(about = "A polite community-listing crawler", long_about = None)]
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

    /// Keep crawling in passes until interrupted
    #[arg(long)]
    gold: bool,

    /// Override the output path from the config
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "repair"])]
    dry_run: bool,

    /// Show statistics from the record log and exit
    #[arg(long, conflicts_with_all = ["dry_run", "repair"])]
    stats: bool,

    /// Repair the record log and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    repair: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            if e
                .downcast_ref::<RedlistError>()
                .is_some_and(RedlistError::is_storage_failure)
            {
                tracing::error!("The record log may hold a torn line; run again with --repair");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.gold {
        config.crawler.continuous_mode = true;
    }
    if let Some(out) = &cli.out {
        config.output.output_path = out.display().to_string();
    }

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.repair {
        handle_repair(&config)
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
            0 => EnvFilter::new("redlist=info,warn"),
            1 => EnvFilter::new("redlist=debug,info"),
            2 => EnvFilter::new("redlist=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Redlist Dry Run ===\n");

    println!("Crawler:");
    println!("  Target count: {}", config.crawler.target_count);
    println!(
        "  Rate-limit restart threshold: {}",
        config.crawler.rate_limit_threshold
    );
    println!("  Continuous mode: {}", config.crawler.continuous_mode);
    println!(
        "  Minimum request gap: {}ms (+{}ms jitter)",
        config.fetcher.min_interval, config.fetcher.jitter
    );
    println!(
        "  Verification: {:?}, batch {}, {} workers",
        config.verifier.mode, config.verifier.batch_size, config.verifier.max_workers
    );
    println!("  Extraction: {:?}", config.extractor.strategy);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nUpstream: {}", config.upstream.base_url);
    println!("Output: {}", config.output.output_path);

    println!(
        "\nPriority Targets ({}):",
        config.frontier.priority_targets.len()
    );
    for target in &config.frontier.priority_targets {
        println!("  - {}", target);
    }
    if config.frontier.firehose_every >= 2 {
        println!(
            "Firehose: {} every {} fetches",
            config.frontier.firehose_target, config.frontier.firehose_every
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the record log
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Record log: {}\n", config.output.output_path);

    let store = NdjsonStore::open(&config.output.output_path, config.output.durability())?;
    let stats = load_statistics(&store, STATS_TOP)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --repair mode: rewrites the record log from its valid records
fn handle_repair(config: &Config) -> anyhow::Result<()> {
    let store = NdjsonStore::open(&config.output.output_path, config.output.durability())?;
    let report = store
        .repair()
        .with_context(|| format!("Failed to repair {}", config.output.output_path))?;

    println!("✓ Repaired {}", config.output.output_path);
    println!("  Records kept: {}", report.kept);
    println!("  Duplicates dropped: {}", report.duplicates);
    println!("  Bytes discarded: {}", report.discarded_bytes);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        "Target {} communities from {} priority listings{}",
        config.crawler.target_count,
        config.frontier.priority_targets.len(),
        if config.crawler.continuous_mode {
            " (continuous)"
        } else {
            ""
        }
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current round");
            trigger.cancel();
        }
    });

    let summary = crawl(config, cancel).await.context("Crawl failed")?;

    if summary.cancelled {
        tracing::info!("Crawl cancelled with {} communities known", summary.seen);
    } else {
        tracing::info!("Crawl completed with {} communities known", summary.seen);
    }
    Ok(())
}
