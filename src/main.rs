//! govdoc-crawler main entry point
//!
//! This is the command-line interface for the incremental government PDF crawler.

use anyhow::Context;
use clap::Parser;
use govdoc_crawler::config::{load_config_with_hash, Config};
use govdoc_crawler::crawler::{CrawlResults, DryRunReport};
use govdoc_crawler::Coordinator;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

/// govdoc-crawler: incremental PDF harvesting for government websites
///
/// Discovers PDF documents on the configured department sites, remembers
/// what earlier runs already found, and downloads only new or changed files.
#[derive(Parser, Debug)]
#[command(name = "govdoc-crawler")]
#[command(version = "1.0.0")]
#[command(about = "Incremental PDF crawler for government websites", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG", default_value = "crawler.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Only crawl these departments (table key or display name; repeatable)
    #[arg(short, long = "department", value_name = "DEPARTMENT")]
    departments: Vec<String>,

    /// Probe seed URLs and estimate the crawl without downloading
    #[arg(long, conflicts_with = "cache_stats")]
    dry_run: bool,

    /// Remove cache entries older than this many days before crawling
    #[arg(long, value_name = "DAYS")]
    cleanup_days: Option<u64>,

    /// Re-download files even if the registry says they are unchanged
    #[arg(long)]
    force: bool,

    /// Show discovery cache statistics and exit
    #[arg(long, conflicts_with = "dry_run")]
    cache_stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let coordinator =
        Coordinator::new(config, cli.force).context("Failed to initialize crawler")?;

    if cli.cache_stats {
        handle_cache_stats(&coordinator);
        return Ok(());
    }

    if let Some(days) = cli.cleanup_days {
        let (pdfs, pages) = coordinator
            .cache()
            .cleanup(days)
            .context("Failed to clean up discovery cache")?;
        tracing::info!("Removed {} PDFs and {} pages from the cache", pdfs, pages);
    }

    if cli.dry_run {
        let report = coordinator.dry_run(&cli.departments).await;
        print_dry_run(&report);
        return Ok(());
    }

    handle_crawl(&coordinator, &cli.departments).await;
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("govdoc_crawler=info,warn"),
            1 => EnvFilter::new("govdoc_crawler=debug,info"),
            2 => EnvFilter::new("govdoc_crawler=trace,debug"),
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

/// Handles the main crawl operation
async fn handle_crawl(coordinator: &Coordinator, departments: &[String]) {
    log_config_overview(coordinator.config());

    let shutdown = coordinator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight downloads");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    let results = coordinator.crawl(departments).await;
    log_results(&results);

    let registry = coordinator.storage().registry_stats();
    tracing::info!(
        "File registry: {} files, {:.2} MB",
        registry.total_files,
        registry.total_bytes as f64 / (1024.0 * 1024.0)
    );
}

fn log_config_overview(config: &Config) {
    let seed_count: usize = config.departments.values().map(|d| d.seed_urls.len()).sum();
    tracing::info!(
        "Departments: {}, seed URLs: {}, download workers: {}",
        config.departments.len(),
        seed_count,
        config.settings.max_concurrent_downloads
    );
}

fn log_results(results: &CrawlResults) {
    for dept in &results.departments {
        tracing::info!(
            "{}: {} pages, {} new PDFs, {} downloaded ({} up to date), {} failed, {:.2} MB",
            dept.department,
            dept.urls_crawled,
            dept.pdfs_found,
            dept.pdfs_downloaded,
            dept.pdfs_skipped,
            dept.pdfs_failed,
            dept.total_size as f64 / (1024.0 * 1024.0)
        );
        for error in &dept.errors {
            tracing::debug!("  {}", error);
        }
    }
}

/// Handles the --cache-stats mode
fn handle_cache_stats(coordinator: &Coordinator) {
    let stats = coordinator.cache().stats();

    println!("=== Discovery Cache ===\n");
    println!("Cache directory: {}", coordinator.config().cache.dir);
    println!(
        "  PDFs:  {} total, {} seen in the last 24h",
        stats.total_cached_pdfs, stats.recent_pdfs
    );
    println!(
        "  Pages: {} total, {} crawled in the last 24h",
        stats.total_cached_pages, stats.recent_pages
    );
    println!("  Oldest entry: {:.1} hours ago", stats.cache_age_hours);

    let registry = coordinator.storage().registry_stats();
    println!(
        "\nFile registry: {} files, {:.2} MB",
        registry.total_files,
        registry.total_bytes as f64 / (1024.0 * 1024.0)
    );
}

fn print_dry_run(report: &DryRunReport) {
    println!("=== govdoc-crawler Dry Run ===\n");

    for analysis in &report.department_analyses {
        println!("{}", analysis.department);
        println!(
            "  Seeds reachable: {}/{}",
            analysis.seed_urls_accessible, analysis.seed_urls_total
        );
        println!("  Estimated PDFs: {}", analysis.estimated_pdfs);
        if analysis.requires_browser {
            println!("  Looks script-rendered; browser automation may be needed");
        }
        if analysis.rate_limit_detected {
            println!("  Rate limiting detected");
        }
    }

    println!(
        "\nTotal estimated PDFs: {} (~{:.1} minutes)",
        report.total_estimated_pdfs,
        report.estimated_duration.as_secs_f64() / 60.0
    );

    if !report.issues_found.is_empty() {
        println!("\nIssues:");
        for issue in &report.issues_found {
            println!("  - {}", issue);
        }
    }

    if !report.recommendations.is_empty() {
        println!("\nRecommendations:");
        for rec in &report.recommendations {
            println!("  - {}", rec);
        }
    }
}
