//! syncsrv - mirror IoT platform entities and telemetry into SQLite

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use common::logging::{self, LogConfig};
use common::sqlite::SqliteClient;
use common::{ServiceArgs, SystemTimeProvider};
use tracing::{error, info};

use syncsrv::record::{FieldValue, Record};
use syncsrv::report::RunReport;
use syncsrv::source::{HttpSource, TelemetrySource};
use syncsrv::{
    schema, sqlite_reconciler, timestamp, CollectWindow, EntityKind, EntitySyncer, SyncConfig,
    TelemetryCollector,
};

#[derive(Parser)]
#[command(name = "syncsrv")]
#[command(about = "Mirror IoT platform entities and telemetry into a local SQLite store")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: ServiceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the mirror tables
    Init,

    /// Collect telemetry for a time window
    Collect {
        /// Window start, RFC 3339 or 13-digit epoch (default: last N hours)
        #[arg(long, value_parser = parse_since, conflicts_with = "resume")]
        since: Option<DateTime<Utc>>,

        /// Window length in hours when no start is given
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        window_hours: Option<u64>,

        /// Only collect these devices (by name, repeatable)
        #[arg(short, long = "device")]
        devices: Vec<String>,

        /// Maximum points per key
        #[arg(long)]
        limit: Option<u32>,

        /// Continue from the end of the last recorded window
        #[arg(long)]
        resume: bool,
    },

    /// Mirror device and/or asset entities
    SyncEntities {
        /// Entity kind (default: both)
        #[arg(short, long, value_enum)]
        kind: Option<EntityKind>,
    },

    /// Delete one mirrored row by its natural key
    Purge {
        /// Collection (table) name
        collection: String,

        /// Natural-key value as field=value (repeatable)
        #[arg(short, long = "key", value_parser = parse_key_value, required = true)]
        keys: Vec<(String, String)>,
    },
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ms) = raw.parse::<i64>() {
        return timestamp::to_instant(ms).map_err(|e| e.to_string());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 or 13-digit epoch: {}", e))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        },
        _ => Err(format!("expected field=value, got '{}'", raw)),
    }
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

async fn open_mirror(db_path: &str) -> Result<SqliteClient> {
    SqliteClient::open_existing(db_path).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SyncConfig::load(cli.args.config.as_deref().map(Path::new))
        .context("Failed to load configuration")?;

    let mut log_config = LogConfig {
        service_name: syncsrv::config::SERVICE_NAME.to_string(),
        level: cli.args.parse_log_level(),
        enable_file: config.logging.file,
        enable_json: config.logging.json,
        ..Default::default()
    };
    if let Some(dir) = &cli.args.log_dir {
        log_config.log_dir = PathBuf::from(dir);
    }
    logging::init_with_config(log_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let db_path = cli.args.get_db_path(&config.database.path);

    if let Err(e) = run(cli.command, &config, &db_path).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(command: Commands, config: &SyncConfig, db_path: &str) -> Result<()> {
    match command {
        Commands::Init => {
            let client = SqliteClient::new(db_path).await?;
            schema::init_database(&client).await?;
            client.close().await;
        },

        Commands::Collect {
            since,
            window_hours,
            devices,
            limit,
            resume,
        } => {
            let mut collector_config = config.collector.clone();
            if let Some(limit) = limit {
                collector_config.limit = limit.max(1);
            }
            let hours = window_hours.unwrap_or(collector_config.window_hours);

            let client = open_mirror(db_path).await?;
            let source: Arc<dyn TelemetrySource> = Arc::new(HttpSource::new(&config.source)?);
            let collector = TelemetryCollector::new(
                source,
                sqlite_reconciler(client.clone()),
                Arc::new(SystemTimeProvider),
                collector_config,
            );

            let window = match since {
                Some(start) => CollectWindow::Since(start),
                None if resume => {
                    collector
                        .resume_window(CollectWindow::last_hours(hours)?)
                        .await?
                },
                None => CollectWindow::last_hours(hours)?,
            };

            let report = collector.collect(window, &devices).await?;
            client.close().await;
            print_report(&report)?;
        },

        Commands::SyncEntities { kind } => {
            let client = open_mirror(db_path).await?;
            let source: Arc<dyn TelemetrySource> = Arc::new(HttpSource::new(&config.source)?);
            let syncer = EntitySyncer::new(source, sqlite_reconciler(client.clone()));

            let kinds = match kind {
                Some(kind) => vec![kind],
                None => vec![EntityKind::Device, EntityKind::Asset],
            };
            let mut report = RunReport::new();
            for kind in kinds {
                report.merge(syncer.sync(kind).await?);
            }
            client.close().await;
            print_report(&report)?;
        },

        Commands::Purge { collection, keys } => {
            let client = open_mirror(db_path).await?;
            let reconciler = sqlite_reconciler(client.clone());

            let record: Record = keys
                .into_iter()
                .map(|(field, value)| (field, FieldValue::Text(value)))
                .collect();
            let removed = reconciler.delete(&collection, &record).await?;
            info!("{}: {} row(s) removed", collection, removed);
            client.close().await;
        },
    }
    Ok(())
}
