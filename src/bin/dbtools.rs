//! Administrative tool for the telemetry database.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use arduino_telemetry::admin::{self, PgTools};
use arduino_telemetry::config::{Settings, DEFAULT_SETTINGS_PATH};
use arduino_telemetry::database::{Database, ReadingQuery};
use arduino_telemetry::error::AdminError;
use arduino_telemetry::models::SensorAddress;
use arduino_telemetry::utils::format_export_timestamp;

#[derive(Debug, Parser)]
#[command(author, version, about = "Query, export, back up and restore the telemetry database")]
struct Cli {
    /// Settings file (key=value lines)
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH, global = true)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the PostgreSQL daemon with pg_ctl
    Start,
    /// Stop the PostgreSQL daemon with pg_ctl
    Stop,
    /// Check that the database accepts connections
    Connect,
    /// Print rows of one sensor table
    Query(QueryArgs),
    /// Write rows of one sensor table to CSV
    Export {
        #[command(flatten)]
        query: QueryArgs,
        /// Output file; defaults to export_path from the settings
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Dump the database into backup_path
    Backup {
        /// Skip the confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Replace the database with the single file in backup_path/backup_to_use
    Restore {
        /// Skip the confirmation
        #[arg(long)]
        yes: bool,
        /// Dump the current database before restoring
        #[arg(long)]
        backup_first: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Newest rows first
    Recent,
    /// Rows strictly between --from and --to
    Range,
}

#[derive(Debug, ClapArgs)]
struct QueryArgs {
    /// Module (schema) name
    schema: String,
    /// Sensor (table) name
    table: String,
    #[arg(long, value_enum, default_value_t = Mode::Recent)]
    mode: Mode,
    /// Maximum number of rows
    #[arg(long, default_value_t = 5)]
    limit: i64,
    /// Lower bound (RFC 3339), exclusive
    #[arg(long, value_parser = parse_timestamp)]
    from: Option<OffsetDateTime>,
    /// Upper bound (RFC 3339), exclusive
    #[arg(long, value_parser = parse_timestamp)]
    to: Option<OffsetDateTime>,
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| format!("invalid timestamp: {}", e))
}

impl QueryArgs {
    fn address(&self) -> SensorAddress {
        SensorAddress::new(&self.schema, &self.table)
    }

    fn reading_query(&self) -> Result<ReadingQuery, String> {
        match self.mode {
            Mode::Recent => Ok(ReadingQuery::MostRecent { limit: self.limit }),
            Mode::Range => match (self.from, self.to) {
                (Some(lower), Some(upper)) => Ok(ReadingQuery::Between {
                    lower,
                    upper,
                    limit: self.limit,
                }),
                _ => Err("--mode range needs both --from and --to".to_string()),
            },
        }
    }
}

async fn connect(settings: &Settings) -> Result<Database, AdminError> {
    let mut database_settings = settings.database.clone();
    // Interactive tool: one attempt, fail fast
    database_settings.connection_attempts = 1;
    Ok(Database::connect(&database_settings).await?)
}

fn pg_ctl(settings: &Settings, action: &str) -> Result<tokio::process::Command, AdminError> {
    let tools = PgTools::from_settings(settings)?;
    let cluster = settings
        .paths
        .data_cluster
        .as_ref()
        .ok_or(AdminError::MissingSetting("data_cluster_path"))?;
    Ok(tools.pg_ctl(cluster, action))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(&cli.settings)?;

    match cli.command {
        Command::Start => {
            admin::run_command(pg_ctl(&settings, "start")?).await?;
            match connect(&settings).await {
                Ok(_) => info!("Database is up"),
                Err(e) => warn!("Daemon started but connection failed: {}", e),
            }
        }
        Command::Stop => {
            admin::run_command(pg_ctl(&settings, "stop")?).await?;
        }
        Command::Connect => {
            connect(&settings).await?;
            info!("Connection OK");
        }
        Command::Query(query) => {
            let database = connect(&settings).await?;
            let readings = database
                .query_readings(&query.address(), query.reading_query()?)
                .await?;
            println!("id, timestamp, value");
            for reading in &readings {
                println!(
                    "{}, {}, {}",
                    reading.id,
                    format_export_timestamp(&reading.timestamp),
                    reading.value
                );
            }
            info!("{} rows", readings.len());
        }
        Command::Export { query, output } => {
            let database = connect(&settings).await?;
            let readings = database
                .query_readings(&query.address(), query.reading_query()?)
                .await?;
            let path = output.unwrap_or_else(|| settings.paths.export.clone());
            admin::export_csv(&path, &readings)?;
        }
        Command::Backup { yes } => {
            if !yes {
                warn!("Backing up the database may take some time. Re-run with --yes to continue.");
                return Ok(());
            }
            let tools = PgTools::from_settings(&settings)?;
            admin::backup(&tools, &settings.paths.backup).await?;
        }
        Command::Restore { yes, backup_first } => {
            if !yes {
                warn!(
                    "Restoring replaces the whole database. Place the backup to use in {} and re-run with --yes.",
                    settings.paths.backup.join(admin::STAGING_DIR).display()
                );
                return Ok(());
            }
            let tools = PgTools::from_settings(&settings)?;
            admin::restore(&tools, &settings.paths.backup, backup_first).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}
