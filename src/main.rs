//! Facility-Harvest main entry point
//!
//! This is the command-line interface for the facility harvest pipeline.

use clap::Parser;
use facility_harvest::checkpoint::open_checkpoint;
use facility_harvest::config::{load_config_with_hash, Config};
use facility_harvest::harvest::{DetailPageProcessor, FileWorkSource, WorkSource};
use facility_harvest::{PipelineContext, Scheduler};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Facility-Harvest: a resumable facility data harvester
///
/// Reads a list of facility IDs, fetches each facility's detail page under a
/// concurrency limit, and appends the extracted rows to an output file. Progress is
/// checkpointed per item, so an interrupted run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "facility-harvest")]
#[command(version)]
#[command(about = "A resumable facility data harvester", long_about = None)]
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

    /// Resume from the checkpoint (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Clear the checkpoint and output, then process every item
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be processed without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "export_checkpoint"])]
    dry_run: bool,

    /// Show statistics from the checkpoint and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export_checkpoint"])]
    stats: bool,

    /// Write completed and failed items from the checkpoint to a JSON file and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dry_run", "stats"])]
    export_checkpoint: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Environment overrides may come from a .env file
    dotenvy::dotenv().ok();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.fresh {
        config.pipeline.skip_completed = false;
    }

    if cli.dry_run {
        handle_dry_run(&config).await?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(path) = &cli.export_checkpoint {
        handle_export_checkpoint(&config, path)?;
    } else {
        handle_run(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("facility_harvest=info,warn"),
            1 => EnvFilter::new("facility_harvest=debug,info"),
            2 => EnvFilter::new("facility_harvest=trace,debug"),
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

/// Handles the --dry-run mode: validates config and counts pending items
async fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Facility-Harvest Dry Run ===\n");

    println!("Pipeline:");
    println!("  Concurrency: {}", config.pipeline.concurrency);
    println!("  Skip completed: {}", config.pipeline.skip_completed);
    println!("  Retry failed: {}", config.pipeline.retry_failed);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms doubling up to {}ms",
        config.retry.base_delay_ms, config.retry.max_delay_ms
    );

    println!("\nCheckpoint:");
    println!("  Backend: {:?}", config.checkpoint.backend);
    println!("  Path: {}", config.checkpoint.path);

    println!("\nOutput:");
    println!("  Format: {:?}", config.output.format);
    println!("  Path: {}", config.output.path);

    println!("\nHarvest:");
    match (&config.harvest.url_template, &config.harvest.url_field) {
        (Some(template), _) => println!("  URL template: {}", template),
        (None, Some(field)) => println!("  URL field: {}", field),
        (None, None) => {}
    }
    println!("  Fields ({}):", config.harvest.fields.len());
    for field in &config.harvest.fields {
        println!("    - {} <- {}", field.name, field.selector);
    }
    if let Some(reports) = &config.harvest.reports {
        println!("  Reports: {} -> {}", reports.selector, reports.directory);
    }

    // Selectors and URL settings are compiled the same way a run compiles them
    DetailPageProcessor::from_config(config)?;

    let items = FileWorkSource::from_config(&config.source).load().await?;
    let done: HashSet<String> = if config.pipeline.skip_completed
        && Path::new(&config.checkpoint.path).exists()
    {
        let mut store = open_checkpoint(&config.checkpoint)?;
        store.load_terminal_ids(!config.pipeline.retry_failed)?
    } else {
        HashSet::new()
    };

    let unique: HashSet<&str> = items.iter().map(|item| item.id()).collect();
    let pending = unique.iter().filter(|id| !done.contains(**id)).count();

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Work list has {} items ({} unique), {} would be processed",
        items.len(),
        unique.len(),
        pending
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the checkpoint
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use facility_harvest::output::{load_statistics, print_statistics};

    println!("Checkpoint: {}\n", config.checkpoint.path);

    let mut store = open_checkpoint(&config.checkpoint)?;
    let stats = load_statistics(store.as_mut())?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export-checkpoint mode
fn handle_export_checkpoint(config: &Config, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    use facility_harvest::output::export_checkpoint;

    println!("=== Exporting Checkpoint ===\n");
    println!("Checkpoint: {}", config.checkpoint.path);
    println!("Output: {}", path.display());
    println!();

    let mut store = open_checkpoint(&config.checkpoint)?;
    let export = export_checkpoint(store.as_mut(), path)?;

    println!(
        "✓ Exported {} completed and {} failed items to: {}",
        export.completed.len(),
        export.failed.len(),
        path.display()
    );

    Ok(())
}

/// Handles the main harvest run
async fn handle_run(config: Config, config_hash: String) -> Result<(), Box<dyn std::error::Error>> {
    if config.pipeline.skip_completed {
        tracing::info!("Starting harvest (will resume from checkpoint if present)");
    } else {
        tracing::info!("Starting fresh harvest (ignoring previous progress)");
    }

    let items = FileWorkSource::from_config(&config.source).load().await?;
    let processor = Arc::new(DetailPageProcessor::from_config(&config)?);
    let ctx = PipelineContext::from_config(&config, Some(config_hash))?;

    match Scheduler::new(ctx).run(items, processor).await {
        Ok(summary) => {
            tracing::info!("Harvest finished: {}", summary);

            println!("\n=== Harvest Summary ===\n");
            println!("  Work items: {}", summary.total_items);
            println!("  Duplicates ignored: {}", summary.duplicates);
            println!("  Already done: {}", summary.skipped);
            println!("  Attempted: {}", summary.attempted);
            println!("  Completed: {}", summary.completed);
            println!("  Failed: {}", summary.failed);
            println!("  Rows written: {}", summary.rows_written);
            println!("  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
            if summary.failed > 0 {
                println!(
                    "\n{} items failed; run with --stats to see why, or re-run with retry-failed enabled.",
                    summary.failed
                );
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest aborted: {}", e);
            Err(e.into())
        }
    }
}
