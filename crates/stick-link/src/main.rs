//! stick-link: command-line entry point.
//!
//! Sends MicroPython programs to a handheld device over USB serial or its
//! WebREPL socket, or replays them in the bounded simulator.
//!
//! # Usage
//!
//! ```text
//! stick-link methods                                  list connection methods (JSON)
//! stick-link run prog.py [--serial [PORT]]            run on the device over USB
//! stick-link run prog.py --wifi HOST --password PW    run on the device over WiFi
//! stick-link interrupt [device options]               stop a runaway program
//! stick-link reset [device options]                   soft-reset the interpreter
//! stick-link monitor [device options]                 stream device output until Ctrl+C
//! stick-link simulate prog.py [--ceiling N]           run in the simulator (JSON report)
//! stick-link init-config [--force]                    write the effective settings to the config file
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                      | Description                          |
//! |-------------------------------|--------------------------------------|
//! | `STICK_LINK_CONFIG`           | Config file instead of the default   |
//! | `STICK_LINK_WEBREPL_PASSWORD` | WebREPL password                     |
//! | `RUST_LOG`                    | Log filter; overrides `log_level`    |
//!
//! Program output and JSON go to stdout; logs go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stick_core::{Canvas, DisplaySurface};
use stick_link::application::capabilities::CapabilityDetector;
use stick_link::application::repl::{ReplEngine, ReplError};
use stick_link::application::simulate::{SharedCanvas, Simulator, ToneCallback};
use stick_link::application::transport::{Transport, TransportEvent};
use stick_link::infrastructure::host::NativeHost;
use stick_link::infrastructure::serial::{SerialConfig, SerialTransport};
use stick_link::infrastructure::socket::{SocketConfig, SocketTransport};
use stick_link::infrastructure::storage::config::{
    config_file_path, load_config, load_config_from, save_config, save_config_to, AppConfig,
    ConfigError,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Drive a handheld MicroPython device, or simulate it.
#[derive(Debug, Parser)]
#[command(
    name = "stick-link",
    about = "Run MicroPython programs on a handheld device over USB or WiFi, or in a simulator",
    version
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, env = "STICK_LINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the usable and recommended connection methods as JSON.
    Methods,
    /// Run a program on the device and print its output.
    Run {
        /// MicroPython source file.
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Stop whatever program the device is running.
    Interrupt {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Soft-reset the device's interpreter.
    Reset {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Print everything the device sends until Ctrl+C.
    Monitor {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Run a program in the bounded simulator and print a JSON report.
    Simulate {
        /// MicroPython source file.
        file: PathBuf,
        /// Maximum iterations of any loop.
        #[arg(long)]
        ceiling: Option<u32>,
    },
    /// Write the effective settings to the config file (`--config` or the
    /// platform default).
    InitConfig {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Which device link to use.
///
/// With neither `--serial` nor `--wifi`, the serial settings from the config
/// file apply.
#[derive(Debug, Clone, Default, Args)]
struct DeviceArgs {
    /// Connect over USB serial, optionally naming the port.
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    serial: Option<String>,

    /// Connect to the WebREPL at this host or IP address.
    #[arg(long)]
    wifi: Option<String>,

    /// WebREPL password.
    #[arg(long, env = "STICK_LINK_WEBREPL_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

/// A resolved link choice.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Serial(SerialConfig),
    Wifi(SocketConfig),
}

impl DeviceArgs {
    /// Merges the flags over the file configuration.  `--serial` wins over
    /// `--wifi`.
    fn target(&self, config: &AppConfig) -> Target {
        if let Some(port) = &self.serial {
            let mut serial = config.serial.clone();
            if !port.is_empty() {
                serial.port_name = Some(port.clone());
            }
            return Target::Serial(serial);
        }
        if let Some(host) = &self.wifi {
            let mut wifi = config.wifi.clone();
            wifi.host = host.clone();
            if let Some(password) = &self.password {
                wifi.password = password.clone();
            }
            return Target::Wifi(wifi);
        }
        Target::Serial(config.serial.clone())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = read_config(cli.config.as_deref()).context("failed to load configuration")?;

    // `RUST_LOG` wins; otherwise the configured level.  Logs go to stderr so
    // stdout carries only program output and JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Methods => print_methods(),
        Command::Run { file, device } => run_on_device(&file, &device, &config).await,
        Command::Interrupt { device } => interrupt_device(&device, &config).await,
        Command::Reset { device } => reset_device(&device, &config).await,
        Command::Monitor { device } => monitor_device(&device, &config).await,
        Command::Simulate { file, ceiling } => simulate(&file, ceiling, &config).await,
        Command::InitConfig { force } => init_config(cli.config.as_deref(), force, &config),
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => load_config_from(path),
        None => match load_config() {
            Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
            other => other,
        },
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn init_config(path: Option<&Path>, force: bool, config: &AppConfig) -> anyhow::Result<()> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    if target.exists() && !force {
        return Err(anyhow!(
            "{} already exists; pass --force to overwrite it",
            target.display()
        ));
    }
    match path {
        Some(path) => save_config_to(config, path)?,
        None => save_config(config)?,
    }
    info!(path = %target.display(), "configuration written");
    println!("{}", target.display());
    Ok(())
}

fn print_methods() -> anyhow::Result<()> {
    let detector = CapabilityDetector::new(Arc::new(NativeHost));
    let report = json!({
        "available": detector.available_methods(),
        "recommended": detector.recommended_method(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_on_device(file: &Path, device: &DeviceArgs, config: &AppConfig) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let transport = connect(device, config).await?;

    let mut engine = ReplEngine::new(Arc::clone(&transport), config.repl.clone());
    let result = engine.execute_code(&code).await;
    transport.disconnect().await;
    let output = result.map_err(repl_failure)?;

    print!("{}", output.combined());
    std::io::stdout().flush()?;
    if output.timed_out {
        warn!("program did not finish in time; it was interrupted and the output is partial");
    }
    Ok(())
}

async fn interrupt_device(device: &DeviceArgs, config: &AppConfig) -> anyhow::Result<()> {
    let transport = connect(device, config).await?;
    let mut engine = ReplEngine::new(Arc::clone(&transport), config.repl.clone());
    let result = engine.interrupt().await;
    transport.disconnect().await;
    result.map_err(repl_failure)?;
    info!("device interrupted");
    Ok(())
}

async fn reset_device(device: &DeviceArgs, config: &AppConfig) -> anyhow::Result<()> {
    let transport = connect(device, config).await?;
    let mut engine = ReplEngine::new(Arc::clone(&transport), config.repl.clone());
    let result = engine.soft_reset().await;
    transport.disconnect().await;
    result.map_err(repl_failure)?;
    info!("device soft-reset");
    Ok(())
}

async fn monitor_device(device: &DeviceArgs, config: &AppConfig) -> anyhow::Result<()> {
    let transport = connect(device, config).await?;
    let mut events = transport.subscribe();
    info!("monitoring device output, press Ctrl+C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!("failed to listen for Ctrl+C signal: {e}");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(TransportEvent::Data(text)) => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                Ok(TransportEvent::Error(message)) => warn!("{message}"),
                Ok(TransportEvent::Connected) => {}
                Ok(TransportEvent::Disconnected) | Err(RecvError::Closed) => {
                    warn!("device disconnected");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "terminal fell behind; output lost"),
            },
        }
    }

    transport.disconnect().await;
    Ok(())
}

async fn simulate(file: &Path, ceiling: Option<u32>, config: &AppConfig) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let mut sim_config = config.simulator.clone();
    if let Some(ceiling) = ceiling {
        sim_config.iteration_ceiling = ceiling;
    }

    let surface = Arc::new(Mutex::new(DisplaySurface::new()));
    let canvas: SharedCanvas = surface.clone();
    let on_tone: ToneCallback = Arc::new(|frequency_hz: u32, duration_ms: u32| {
        info!(frequency_hz, duration_ms, "tone");
    });
    let simulator = Arc::new(Simulator::new(sim_config, canvas).with_tone_callback(on_tone));

    let watcher = {
        let simulator = Arc::clone(&simulator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, cancelling simulation");
                simulator.cancel();
            }
        })
    };
    let report = simulator.run(&source).await;
    watcher.abort();
    let report = report?;

    let surface = surface
        .lock()
        .map_err(|_| anyhow!("display surface is unusable after a drawing failure"))?;
    let output = json!({
        "report": report,
        "snapshot": surface.snapshot(),
        "background": surface.background().to_css(),
        "text_color": surface.text_color().to_css(),
        "text_size": surface.text_size(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn connect(device: &DeviceArgs, config: &AppConfig) -> anyhow::Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match device.target(config) {
        Target::Serial(serial) => Arc::new(SerialTransport::with_auto_picker(serial)),
        Target::Wifi(wifi) => Arc::new(SocketTransport::new(wifi)),
    };
    let kind = transport.kind();
    transport
        .connect()
        .await
        .map_err(|e| anyhow!("{e} [{}]\nhint: {}", e.code(), e.hint()))
        .with_context(|| format!("could not connect over {kind}"))?;
    Ok(transport)
}

fn repl_failure(e: ReplError) -> anyhow::Error {
    anyhow!("{e}\nhint: {}", e.hint())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
