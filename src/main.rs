//! # ROV Odometer
//!
//! Usage odometer daemon for remotely operated vehicles.
//!
//! Polls the vehicle's mavlink2rest endpoint once a minute, accumulates
//! usage counters and mission history under the data directory, and pushes
//! a few headline counters back onto the vehicle bus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rov_odometer::config::{Config, LoggingConfig};
use rov_odometer::engine::{local_now, Engine};
use rov_odometer::service::Service;
use rov_odometer::telemetry::mavlink::MavlinkRest;
use rov_odometer::telemetry::TelemetrySource;

/// File name prefix for the rolling log.
const LOG_FILE_PREFIX: &str = "odometer.log";

#[derive(Debug, Parser)]
#[command(name = "rov-odometer", version, about = "Usage odometer daemon for ROVs")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
            config.validate()?;
        }

        Ok(config)
    }
}

/// Log to stdout and to a daily rolling file. The returned guard flushes the
/// file writer when dropped, so keep it alive for the whole run.
fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log directory {}", config.log_dir.display()))?;

    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log level")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    let _log_guard = init_logging(&config.logging)?;

    info!("ROV Odometer v{} starting...", env!("CARGO_PKG_VERSION"));

    let engine = Arc::new(Engine::open(&config).context("opening odometer data")?);

    let now = local_now();
    engine.reconcile(now);
    engine.detect_startup(now);

    let stats = engine.stats();
    info!(
        "Resuming at {} total minutes ({} armed, {} swaps, {} startups)",
        stats.total_minutes, stats.armed_minutes, stats.battery_swaps, stats.startups
    );

    let source: Arc<dyn TelemetrySource> = Arc::new(MavlinkRest::new(&config.telemetry)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = Service::new(engine.clone(), source, config).spawn(shutdown_rx);

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    let stats = engine.stats();
    info!(
        "Stopped at {} total minutes, {:.1} Wh consumed",
        stats.total_minutes,
        stats.total_wh_consumed()
    );
    Ok(())
}
