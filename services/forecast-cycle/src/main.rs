//! Forecast-cycle command.
//!
//! Acquires the newest model run for the configured region, normalizes it,
//! loads it into the forecast table and applies retention. Meant to be
//! triggered by an external scheduler several times a day; every command
//! exits non-zero on failure so the scheduler can retry.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use forecast_common::{CycleId, Settings};
use pipeline::{
    CommandTransformer, DataLayout, HttpAcquirer, Pipeline, PipelineFailure, RunReport,
    SystemClock,
};
use storage::{CycleRows, ForecastStore, MemoryForecastStore, PgForecastStore};

#[derive(Parser, Debug)]
#[command(name = "forecast-cycle")]
#[command(about = "Forecast-cycle ingestion and retention pipeline")]
struct Cli {
    /// Root directory holding raw and normalized cycle directories
    #[arg(long, env = "DATA_ROOT", default_value = "data/icon", global = true)]
    data_root: PathBuf,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Use an in-memory forecast table instead of PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Download the newest published cycle
    Download,

    /// Import an already-normalized cycle (YYYYMMDDHH or YYYYMMDD_HH)
    Import {
        /// Cycle directory name
        cycle: String,
    },

    /// Full run: download, normalize, import and apply retention
    Run,

    /// Apply count-based retention only
    Cleanup,

    /// Show cycles on disk and in the database
    Status,
}

/// One cycle as seen by `status`.
#[derive(Debug, Serialize)]
struct CycleOverview {
    cycle: CycleId,
    raw_dirs: usize,
    normalized_dirs: usize,
    db_rows: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::from_env().context("Invalid configuration")?;
    let grid = settings.weather.tile_grid()?;

    info!(
        command = ?cli.command,
        data_root = %cli.data_root.display(),
        model = %settings.weather.model,
        region = %settings.weather.region,
        tile_rows = grid.rows,
        tile_cols = grid.cols,
        tiles = grid.tile_count(),
        "Starting forecast-cycle"
    );

    let store = open_store(&settings, &cli).await?;
    let clock = Arc::new(SystemClock);
    let acquirer = HttpAcquirer::new(settings.source.clone(), &settings.weather, clock.clone())?;
    let transformer = CommandTransformer::new(settings.processor.command.clone());

    let pipeline = Pipeline::new(
        DataLayout::new(&cli.data_root),
        Arc::new(acquirer),
        Arc::new(transformer),
        store,
        settings.import,
        settings.retention,
        clock,
    );

    match &cli.command {
        Command::Download => {
            let report = finish(pipeline.download().await)?;
            if let Some(dir) = report.cycle_dir {
                println!("{}", dir.display());
            }
        }
        Command::Import { cycle } => {
            let report = finish(pipeline.import_cycle(cycle).await)?;
            print_json(&report)?;
        }
        Command::Run => {
            let report = finish(pipeline.run().await)?;
            print_json(&report)?;
        }
        Command::Cleanup => {
            let report = finish(pipeline.cleanup().await)?;
            print_json(&report.post_import)?;
        }
        Command::Status => {
            let status = collect_status(&pipeline).await?;
            print_json(&status)?;
        }
    }

    Ok(())
}

/// PostgreSQL unless the command never touches the table or `--dry-run` is
/// set.
async fn open_store(settings: &Settings, cli: &Cli) -> Result<Arc<dyn ForecastStore>> {
    if cli.dry_run || cli.command == Command::Download {
        info!("Using in-memory forecast table");
        return Ok(Arc::new(MemoryForecastStore::new()));
    }

    info!(url = %settings.database.redacted_url(), "Connecting to database");
    let store = PgForecastStore::connect(&settings.database).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn finish(result: Result<RunReport, PipelineFailure>) -> Result<RunReport> {
    match result {
        Ok(report) => {
            info!(cycle = ?report.cycle.map(|c| c.canonical()), "Command succeeded");
            Ok(report)
        }
        Err(failure) => {
            error!(
                stage = failure.stage.name(),
                kind = failure.source.kind(),
                error = %failure.source,
                "Command failed"
            );
            Err(failure.into())
        }
    }
}

async fn collect_status(pipeline: &Pipeline) -> Result<Vec<CycleOverview>> {
    let on_disk = pipeline.layout().cycle_dirs().await?;
    let in_db: Vec<CycleRows> = pipeline.store().list_cycles().await?;
    Ok(merge_status(
        on_disk
            .iter()
            .map(|d| (d.cycle, d.raw.len(), d.normalized.len()))
            .collect(),
        in_db,
    ))
}

/// Join disk and database views, newest cycle first.
fn merge_status(
    on_disk: Vec<(CycleId, usize, usize)>,
    in_db: Vec<CycleRows>,
) -> Vec<CycleOverview> {
    let mut merged: std::collections::BTreeMap<CycleId, CycleOverview> = on_disk
        .into_iter()
        .map(|(cycle, raw_dirs, normalized_dirs)| {
            (
                cycle,
                CycleOverview {
                    cycle,
                    raw_dirs,
                    normalized_dirs,
                    db_rows: 0,
                },
            )
        })
        .collect();

    for rows in in_db {
        merged
            .entry(rows.cycle)
            .or_insert_with(|| CycleOverview {
                cycle: rows.cycle,
                raw_dirs: 0,
                normalized_dirs: 0,
                db_rows: 0,
            })
            .db_rows = rows.rows;
    }

    merged.into_values().rev().collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
