//! mmwave-bridge binary.
//!
//! Reads the sensor UART (or a recorded frame log) and serves readings over
//! WebSocket until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Server role on the default port, structured frames
//! mmwave-bridge --serial /dev/ttyUSB0
//!
//! # Client role, raw lines, commands typed on the console
//! mmwave-bridge --role client --upstream ws://10.0.0.2:3000/ws --mode passthrough --console
//!
//! # Bench run without hardware
//! mmwave-bridge --replay frames.log --bind 127.0.0.1:8081 -v
//! ```
//!
//! Flags override values from `--config`. `RUST_LOG` overrides the log level.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mmwave_bridge::{
    Bridge, BridgeConfig, ConnectionManager, ConsoleCommands, ParseMode, Result, Role,
    ScriptedSensor, SensorPort, SerialSensor, Transport, WsClient, WsServer,
};

// ============================================================================
// Arguments
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "mmwave-bridge", version)]
#[command(about = "Bridge an mmWave presence sensor UART to WebSocket clients")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Network role
    #[arg(long, value_enum)]
    role: Option<Role>,

    /// Frame grammar
    #[arg(long, value_enum)]
    mode: Option<ParseMode>,

    /// Identifier placed in every envelope
    #[arg(long)]
    sensor_id: Option<String>,

    /// Sensor serial device
    #[arg(long)]
    serial: Option<String>,

    /// Sensor baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Listen address in server role
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Upstream URL in client role (ws://host:port/path)
    #[arg(long)]
    upstream: Option<String>,

    /// Client slots in server role (1-8)
    #[arg(long)]
    max_clients: Option<usize>,

    /// Forward lines typed on stdin to the sensor
    #[arg(long)]
    console: bool,

    /// Replay a recorded frame log instead of opening the UART
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Builds the effective configuration: file, then flags.
    fn to_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_json_file(path)?,
            None => BridgeConfig::new(),
        };

        if let Some(role) = self.role {
            config = config.with_role(role);
        }
        if let Some(mode) = self.mode {
            config = config.with_mode(mode);
        }
        if let Some(sensor_id) = &self.sensor_id {
            config = config.with_sensor_id(sensor_id.as_str());
        }
        if let Some(serial) = &self.serial {
            config.serial_path.clone_from(serial);
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(bind) = self.bind {
            config = config.with_bind_addr(bind);
        }
        if let Some(upstream) = &self.upstream {
            config = config.with_upstream_url(upstream.as_str());
        }
        if let Some(max_clients) = self.max_clients {
            config = config.with_max_clients(max_clients);
        }

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Bridge failed to start");
            ExitCode::FAILURE
        }
    }
}

/// Initializes tracing; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose {
        "mmwave_bridge=debug"
    } else {
        "mmwave_bridge=info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = args.to_config()?;

    let transport: Box<dyn Transport> = match config.role {
        Role::Server => Box::new(WsServer::bind(config.bind_addr).await?),
        Role::Client => Box::new(WsClient::new(
            config.upstream_url()?,
            Duration::from_millis(config.connect_timeout_ms),
        )),
    };
    let manager = ConnectionManager::for_role(transport, &config);

    let sensor: Box<dyn SensorPort> = match &args.replay {
        Some(path) => {
            info!(path = %path.display(), "Replaying recorded frames");
            Box::new(ScriptedSensor::from_file(path)?)
        }
        None => Box::new(SerialSensor::open(&config.serial_path, config.baud_rate)?),
    };

    let mut bridge = Bridge::new(&config, sensor, manager);
    if args.console {
        bridge = bridge.with_commands(Box::new(ConsoleCommands::spawn_stdin()));
    }

    bridge.set_network_ready(true);
    bridge.run(shutdown_signal()).await;

    Ok(())
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
