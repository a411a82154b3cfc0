use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use arduino_telemetry::cache::Registry;
use arduino_telemetry::config::{Settings, DEFAULT_SETTINGS_PATH};
use arduino_telemetry::database::Database;
use arduino_telemetry::error::TelemetryError;
use arduino_telemetry::ingest::run_ingest;
use arduino_telemetry::parameters::load_modules;
use arduino_telemetry::refresh::{ConnectionStatus, RefreshLoop, TerminalRenderer};
use arduino_telemetry::serial::{ArduinoSerial, PacketDecoder};
use arduino_telemetry::state::AppState;

/// Packets buffered between the ingest task and the refresh loop
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Parser)]
#[command(author, version, about = "Live telemetry dashboard for the Arduino sensor rig")]
struct Args {
    /// Settings file (key=value lines)
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Parameter file; overrides ParametersPath from the settings
    #[arg(long)]
    parameters: Option<PathBuf>,

    /// Sensor to show in detail, as module.sensor
    #[arg(long)]
    select: Option<String>,

    /// Create missing schemas and tables on startup
    #[arg(long)]
    create_tables: bool,

    /// Append frames instead of redrawing the screen
    #[arg(long)]
    no_clear: bool,
}

/// Load settings and build the sensor registry
fn load(args: &Args) -> Result<(Settings, Registry), TelemetryError> {
    let settings = Settings::load(&args.settings)?;

    let parameters_path = args
        .parameters
        .clone()
        .unwrap_or_else(|| settings.paths.parameters.clone());
    let registry = Registry::new(load_modules(&parameters_path)?, settings.packet_cache_size)?;

    Ok((settings, registry))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    // Load configuration
    let (settings, registry) = match load(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Loaded {} modules with {} sensors",
        registry.modules().len(),
        registry.sensor_count()
    );

    if let Some(tag) = &args.select {
        if registry.sensor(tag).is_none() {
            warn!("Selected sensor {} is not defined", tag);
        }
    }

    let database = match Database::connect(&settings.database).await {
        Ok(database) => Some(Arc::new(database)),
        Err(e) => {
            error!("{}", e);
            None
        }
    };

    if args.create_tables {
        if let Some(database) = &database {
            if let Err(e) = database.ensure_tables(&registry).await {
                error!("Failed to create tables: {}", e);
            }
        }
    }

    let arduino = match ArduinoSerial::open(&settings.serial) {
        Ok(serial) => Some(serial),
        Err(e) => {
            error!(
                "{}. Double check that the Arduino is connected to a USB port.",
                e
            );
            None
        }
    };

    let mut state = AppState::new(registry, database.is_some(), arduino.is_some());
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

    let ingest = arduino.map(|serial| {
        let decoder = PacketDecoder::new(settings.calibration);
        tokio::spawn(run_ingest(serial.into_port(), decoder, database.clone(), tx))
    });

    let refresh = RefreshLoop {
        interval: settings.refresh_interval,
        selected: args.select.clone(),
        chart_ticks: settings.data_cache_size,
        database: database.map(|database| database as Arc<dyn ConnectionStatus>),
    };
    let mut renderer = TerminalRenderer::stdout(!args.no_clear);

    // Run until Ctrl+C
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let ticks = refresh.run(&mut state, &mut rx, &mut renderer, shutdown).await;

    if let Some(handle) = ingest {
        handle.abort();
    }
    info!(
        "Program terminated by user after {} refreshes and {} packets. Exiting gracefully.",
        ticks, state.packets_received
    );

    Ok(())
}
