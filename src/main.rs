//! pupperlink - operator tool for the quadruped's motion controller
//!
//! Runs one-shot servo and IMU commands, streams telemetry, and manages the calibration
//! record and the servo proxy daemon.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use pupperlink_client::{Client, Config, ServoQuantity};
use pupperlink_protocol::Firmware;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pupperlink")]
#[command(about = "Talk to the quadruped's servo and IMU controller")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "PUPPERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device (overrides the configuration)
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Controller firmware revision (current or legacy)
    #[arg(short, long)]
    firmware: Option<Firmware>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Power the servos on
    Enable,

    /// Power the servos off
    Disable,

    /// Switch servo holding torque
    Torque {
        #[arg(value_enum)]
        state: TorqueState,
    },

    /// Show servo power and torque state
    Status,

    /// Command servo positions
    SetPosition {
        /// Twelve positions, servo 1 first
        positions: Vec<u16>,

        /// Set only this servo (1-12)
        #[arg(long, requires = "position", conflicts_with = "positions")]
        id: Option<u16>,

        /// Position for --id
        #[arg(long, requires = "id")]
        position: Option<u16>,
    },

    /// Read one quantity from every servo
    Get {
        /// position, feedback, speed, load, voltage, temperature, move, current or ping
        quantity: ServoQuantity,
    },

    /// Read the IMU
    Imu {
        #[arg(value_enum)]
        kind: ImuKind,
    },

    /// Measure link latency
    Echo,

    /// Show the controller's protocol version
    Version,

    /// Poll a servo quantity until interrupted
    Monitor {
        quantity: ServoQuantity,

        /// Poll period in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Stop after this many samples
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },

    /// Inspect or reset the calibration record
    Calibration {
        #[command(subcommand)]
        action: CalibrationAction,
    },

    /// Talk to the servo proxy daemon
    Proxy {
        /// Proxy socket (defaults to the configured socket path)
        #[arg(short, long)]
        socket: Option<PathBuf>,

        #[command(subcommand)]
        action: ProxyAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum TorqueState {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum ImuKind {
    SixDof,
    Attitude,
}

#[derive(Subcommand)]
pub(crate) enum CalibrationAction {
    /// Print the stored record
    Show,
    /// Overwrite the record with defaults
    Reset,
}

#[derive(Subcommand)]
pub(crate) enum ProxyAction {
    GetPositions,
    GetLoads,
    SetPositions {
        /// Twelve positions, servo 1 first
        positions: Vec<u16>,
    },
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides();
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::from_env(),
    };

    if let Some(device) = &cli.device {
        config.transport.device = device.clone();
    }
    if let Some(firmware) = cli.firmware {
        config.session.firmware = firmware;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        // Local commands, no controller link needed
        Commands::Calibration { action } => commands::calibration(&config, action, cli.json),
        Commands::Proxy { socket, action } => {
            let socket = socket.unwrap_or_else(|| config.transport.socket_path.clone());
            commands::proxy(&config, &socket, action, cli.json).await
        }
        cmd => {
            let client = Client::connect(&config).await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = match cmd {
                Commands::Monitor {
                    quantity,
                    interval_ms,
                    count,
                } => {
                    let mut poller = config.poller.clone();
                    if let Some(ms) = interval_ms {
                        poller.interval_ms = ms.max(1);
                    }
                    commands::monitor(client.clone(), quantity, &poller, count, cli.json).await
                }
                cmd => commands::execute(&client, cmd, cli.json).await,
            };

            let _ = client.close().await;
            result
        }
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
