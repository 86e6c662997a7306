//! DCC throttle backend entry point.
//!
//! Loads the layout configuration, wires the command-station session and the
//! throttle use cases, and starts the port monitor that connects to the NCE
//! USB interface whenever it is plugged in.
//!
//! # Usage
//!
//! ```text
//! dcc-throttle [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Config file [env: DCC_THROTTLE_CONFIG]
//!                        [default: platform config dir / config.toml]
//!   --port <PORT>        Serial port for this run, e.g. /dev/ttyUSB0 or COM3
//!                        [env: DCC_THROTTLE_PORT]
//!   --log-level <LEVEL>  Overrides [station] log_level; RUST_LOG wins over both
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ AppState::new()        -- session, roster, use cases
//!  └─ start services
//!       ├─ PortMonitor         (Tokio task: enumerate, open, reconnect)
//!       └─ event pump          (logs StationEvents)
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dcc_throttle::application::events::StationEvent;
use dcc_throttle::infrastructure::discovery::SerialPortEnumerator;
use dcc_throttle::infrastructure::serial::SerialLinkOpener;
use dcc_throttle::infrastructure::storage::config::{config_file_path, load_config_at};
use dcc_throttle::infrastructure::ui_bridge::AppState;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DCC throttle backend for NCE USB command stations.
#[derive(Debug, Parser)]
#[command(name = "dcc-throttle", version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "DCC_THROTTLE_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port to use for this run; not written back to the config.
    #[arg(long, env = "DCC_THROTTLE_PORT")]
    port: Option<String>,

    /// Log level when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config_file_path().context("resolving config file location")?,
    };
    let mut config = load_config_at(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    let default_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.station.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level)),
        )
        .init();

    info!(config = %config_path.display(), "DCC throttle starting");

    if let Some(port) = cli.port {
        info!(port = %port, "serial port overridden from the command line");
        config.interface.port = Some(port);
    }
    info!(
        locomotives = config.locomotives.len(),
        consists = config.consists.len(),
        decoders = config.decoders.len(),
        "roster loaded"
    );

    let state = AppState::new(
        config,
        config_path,
        Arc::new(SerialLinkOpener),
        Arc::new(SerialPortEnumerator),
    );

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Port monitor ──────────────────────────────────────────────────────────
    let monitor = state.start_monitor(Arc::clone(&running)).await;

    // ── Event pump ────────────────────────────────────────────────────────────
    let mut events = state.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StationEvent::ConnectionChanged(connected)) => {
                    info!(connected, "command station connection changed");
                }
                Ok(StationEvent::ProgrammingTrackChanged(enabled)) => {
                    info!(enabled, "programming track changed");
                }
                Ok(StationEvent::PortsChanged(ports)) => {
                    let paths: Vec<&str> = ports.iter().map(|p| p.path.as_str()).collect();
                    info!(?paths, "serial ports changed");
                }
                Ok(StationEvent::ThrottleUpdated(_)) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event pump lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("DCC throttle ready.  Press Ctrl-C to exit.");

    // The UI front end drives the bridge commands; headless we simply block
    // until the shutdown flag is cleared.
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    if let Some(handle) = monitor {
        handle.abort();
    }
    state.session.close().await;
    info!("DCC throttle stopped");
    Ok(())
}
