// ABOUTME: CLI entry point for signal-mirror
// ABOUTME: Parses commands and routes to sync, status, daemon and schema bootstrap handlers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use signal_mirror::config::{MirrorConfig, DEFAULT_CONFIG_FILE};
use signal_mirror::mirror::{database_size, MirrorStore, MONITORED_TABLES};
use signal_mirror::sync::{
    CyclePhase, SyncDaemon, SyncOrchestrator, SyncRunReport, SyncStateStore, SyncStatus,
};

#[derive(Parser)]
#[command(name = "signal-mirror")]
#[command(
    about = "Incrementally mirror trading tables from a remote SQLite node",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "SIGNAL_MIRROR_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle, or report sync statistics
    Sync {
        /// Report statistics without syncing
        #[arg(long)]
        status: bool,
        /// Skip change detection and fetch beyond every cursor
        #[arg(long, conflicts_with = "status")]
        force: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run sync cycles continuously until Ctrl+C
    Daemon {
        /// Seconds between cycles (overrides [sync] interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Create the local mirror database and its tables
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = MirrorConfig::load(&cli.config)?;

    match cli.command {
        Commands::Init => init(&config),
        Commands::Sync {
            status: true,
            json,
            ..
        } => status(&config, json).await,
        Commands::Sync { force, json, .. } => sync(&config, force, json).await,
        Commands::Daemon { interval } => daemon(&config, interval).await,
    }
}

fn init(config: &MirrorConfig) -> anyhow::Result<()> {
    let mirror = MirrorStore::open(&config.local.db_path).with_context(|| {
        format!("Failed to initialize mirror at {:?}", config.local.db_path)
    })?;

    println!("Mirror database ready: {}", mirror.path().display());
    for table in MONITORED_TABLES {
        println!("  {:<20} {} rows", table.name, mirror.row_count(table)?);
    }
    Ok(())
}

async fn build_orchestrator(config: &MirrorConfig) -> anyhow::Result<SyncOrchestrator> {
    let channel = config
        .build_channel()
        .context("Invalid remote configuration")?;
    tracing::info!("Remote: {}", channel.describe());

    let mirror = MirrorStore::open(&config.local.db_path)
        .with_context(|| format!("Failed to open mirror at {:?}", config.local.db_path))?;
    let store = SyncStateStore::load(&config.local.state_path).await;

    Ok(SyncOrchestrator::new(
        channel,
        Arc::new(mirror),
        store,
        config.sync.page_size,
    ))
}

async fn status(config: &MirrorConfig, json: bool) -> anyhow::Result<()> {
    // Local only: works without a usable [remote] section or an existing mirror.
    let store = SyncStateStore::load(&config.local.state_path).await;
    let status = SyncStatus::new(
        &store,
        database_size(&config.local.db_path),
        CyclePhase::Idle,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("========================================");
    println!("Sync status");
    println!("========================================");
    match status.last_sync_time {
        Some(at) => println!("  Last sync:       {}", at.to_rfc3339()),
        None => println!("  Last sync:       never"),
    }
    println!(
        "  Cycles:          {} ({} ok, {} failed)",
        status.total_syncs, status.successful_syncs, status.failed_syncs
    );
    println!("  Success rate:    {:.1}%", status.success_rate * 100.0);
    println!("  Last duration:   {:.2}s", status.last_duration_seconds);
    println!("  Records synced:  {}", status.total_records_synced);
    println!(
        "  Mirror size:     {:.2} MB",
        status.mirror_size_bytes as f64 / (1024.0 * 1024.0)
    );
    println!();
    for table in &status.tables {
        println!("  {:<20} cursor {}", table.table_name, table.cursor());
    }
    Ok(())
}

async fn sync(config: &MirrorConfig, force: bool, json: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let report = orchestrator.run(force).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.success {
        anyhow::bail!("Sync cycle failed with {} errors", report.errors.len());
    }
    Ok(())
}

fn print_report(report: &SyncRunReport) {
    println!();
    println!("========================================");
    if !report.sync_performed {
        println!("No sync performed");
        println!("========================================");
        if let Some(reason) = report.skip_reason {
            println!("  Reason: {:?}", reason);
        }
        return;
    }

    println!("Sync cycle complete");
    println!("========================================");
    println!("  Tables processed: {}", report.tables_processed);
    println!("  Records synced:   {}", report.total_records_synced);
    println!("  Duration:         {:.2}s", report.duration_seconds);
    for result in &report.table_results {
        let marker = if result.success { "✓" } else { "✗" };
        match &result.advanced_cursor {
            Some(cursor) => println!(
                "  {} {:<20} {} rows, cursor {}",
                marker, result.table_name, result.records_synced, cursor
            ),
            None => println!(
                "  {} {:<20} {} rows",
                marker, result.table_name, result.records_synced
            ),
        }
    }
    if !report.errors.is_empty() {
        println!("  Errors: {}", report.errors.len());
        for err in &report.errors {
            println!("    - {}", err);
        }
    }
}

async fn daemon(config: &MirrorConfig, interval: Option<u64>) -> anyhow::Result<()> {
    let interval = interval.unwrap_or(config.sync.interval_secs);
    if interval == 0 {
        anyhow::bail!("--interval must be greater than zero");
    }

    let orchestrator = Arc::new(build_orchestrator(config).await?);
    let daemon = SyncDaemon::new(orchestrator, Duration::from_secs(interval));

    tracing::info!("Starting continuous sync daemon...");
    tracing::info!("Press Ctrl+C to stop");

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        let _ = shutdown_tx.send(());
    });

    let stats = daemon.run(shutdown_rx).await;

    println!();
    println!("========================================");
    println!("Sync daemon stopped");
    println!("========================================");
    println!("  Cycles:      {}", stats.cycles);
    println!("  Skipped:     {}", stats.cycles_skipped);
    println!("  Failed:      {}", stats.cycles_failed);
    println!("  Rows synced: {}", stats.rows_synced);
    Ok(())
}
