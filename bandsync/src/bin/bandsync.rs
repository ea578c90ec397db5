use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bandstore::config::{StorageConfig, BASE_PATH_ENV};
use bandstore::models::TaskLog;
use bandstore::BandStores;
use bandsync::config::{SyncConfig, YearRange};
use bandsync::report::{CatalogReporter, FanoutReporter, LogReporter, Reporter};
use bandsync::{Phase, Pipeline, SyncStores};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bandsync",
    about = "Incremental sync of wristband users, sensor data and payments into the graph and warehouse."
)]
struct Cli {
    /// Directory holding the store databases. Falls back to BANDSYNC_BASE_PATH (also read from .env).
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    base_path: Option<PathBuf>,

    /// JSON sync configuration (activity window, date range, reference catalog).
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Minimum log level to display. RUST_LOG takes precedence when set.
    #[arg(long, default_value_t = LogLevelArg::Info, value_enum)]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every phase in dependency order, stopping at the first failure.
    Run {
        /// Also generate the date dimension for the configured year range.
        #[arg(long)]
        with_date_dimension: bool,
    },
    /// Run a single phase.
    Phase {
        /// Phase name, e.g. user-dimension or payment-facts.
        #[arg(value_parser = parse_phase)]
        phase: Phase,
    },
    /// Generate the date dimension for an inclusive year range.
    DateDimension {
        #[arg(long)]
        from: i32,

        #[arg(long)]
        to: i32,
    },
    /// Show recent runs recorded in the catalog.
    History {
        /// Maximum number of task logs to display.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Emit JSON instead of a textual table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warn => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
            LogLevelArg::Trace => LevelFilter::Trace,
        }
    }
}

fn parse_phase(raw: &str) -> std::result::Result<Phase, String> {
    raw.parse::<Phase>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::new();
    logger.filter_level(LevelFilter::from(cli.log_level));
    logger.parse_env(env_logger::Env::default());
    let _ = logger.try_init();

    let storage_config = match &cli.base_path {
        Some(path) => StorageConfig::new(path),
        None => StorageConfig::from_env()
            .with_context(|| format!("pass --base-path or set {BASE_PATH_ENV}"))?,
    };
    let sync_config = match &cli.config {
        Some(path) => SyncConfig::from_path(path)
            .with_context(|| format!("failed to load sync config {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let stores = BandStores::open(storage_config).context("failed to open stores")?;

    if let Commands::History { limit, json } = cli.command {
        let logs = stores
            .catalog
            .recent_task_logs(limit)
            .context("failed to read task logs")?;
        return print_history(&logs, json);
    }

    let reference = sync_config
        .load_reference()
        .context("failed to load reference catalog")?;
    let reporters: Vec<Arc<dyn Reporter>> = vec![
        Arc::new(LogReporter),
        Arc::new(CatalogReporter::new(Arc::clone(&stores.catalog))),
    ];
    let pipeline = Pipeline::new(
        SyncStores::from(&stores),
        reference,
        sync_config,
        Arc::new(FanoutReporter::new(reporters)),
    );

    match cli.command {
        Commands::Run {
            with_date_dimension,
        } => {
            let outcomes = pipeline.run_all(with_date_dimension).await?;
            for (phase, outcome) in outcomes {
                println!("{:<28} {outcome}", phase.name());
            }
        }
        Commands::Phase { phase } => {
            let outcome = pipeline
                .run_phase(phase)
                .await
                .with_context(|| format!("phase {} failed", phase.name()))?;
            println!("{:<28} {outcome}", phase.name());
        }
        Commands::DateDimension { from, to } => {
            let stats = pipeline
                .load_date_dimension(YearRange {
                    start_year: from,
                    end_year: to,
                })
                .await?;
            println!("{:<28} {stats}", Phase::DateDimension.name());
        }
        Commands::History { .. } => {}
    }
    Ok(())
}

fn print_history(logs: &[TaskLog], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(logs)?);
        return Ok(());
    }
    if logs.is_empty() {
        println!("No task logs recorded.");
        return Ok(());
    }
    println!(
        "{:<6} {:<28} {:<10} {:<20} details",
        "id", "task", "status", "started"
    );
    for log in logs {
        let started = chrono::DateTime::from_timestamp(log.start_time, 0)
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| log.start_time.to_string());
        println!(
            "{:<6} {:<28} {:<10} {:<20} {}",
            log.task_id,
            log.task_name,
            log.status,
            started,
            log.details.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
