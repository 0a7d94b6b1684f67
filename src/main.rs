use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use moto_intercom::audio::{AlsaPlatform, AudioPlatform, Direction};
use moto_intercom::config::ConfigStore;
use moto_intercom::events::EventBus;
use moto_intercom::intercom::{Command, IntercomController};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// moto-intercom command line arguments
#[derive(Parser, Debug)]
#[command(name = "moto-intercom")]
#[command(version, about = "Rider/pillion audio intercom", long_about = None)]
struct CliArgs {
    /// Data directory path (default: ~/.config/moto-intercom)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Who talks first: rider or pillion (overrides config)
    #[arg(long, value_name = "SPEAKER", value_parser = parse_direction)]
    direction: Option<Direction>,

    /// Do not request noise suppression on the capture stream
    #[arg(long)]
    no_noise_suppression: bool,

    /// Start routing immediately
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting moto-intercom v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("intercom.json")).await?;
    tracing::info!("Config file: {}", config_store.path().display());
    let config_store = apply_overrides(config_store, &args);
    let config = config_store.get();

    let events = Arc::new(EventBus::new());
    spawn_event_printer(events.subscribe());

    let platform: Arc<dyn AudioPlatform> = Arc::new(AlsaPlatform::new(config.devices.clone()));
    let controller = IntercomController::new(platform, config_store, events);

    if args.autostart {
        if let Err(e) = controller.start().await {
            tracing::warn!("Autostart failed: {}", e);
        }
    }

    tracing::info!("Commands: start, switch, mute, unmute, toggle, stop, status, devices, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            result = &mut shutdown_signal => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for CTRL+C: {}", e);
                }
                tracing::info!("Shutdown signal received");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_line(&controller, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("stdin closed, waiting for CTRL+C");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    controller.shutdown().await;
    tracing::info!("moto-intercom stopped");
    Ok(())
}

/// Returns false when the user asked to quit
async fn handle_line(controller: &IntercomController, line: &str) -> bool {
    match line {
        "" => {}
        "quit" | "exit" => return false,
        "status" => print_json(&controller.status()),
        "devices" => match controller.list_endpoints().await {
            Ok(endpoints) => print_json(&endpoints),
            Err(e) => tracing::warn!("Failed to list endpoints: {}", e),
        },
        other => match other.parse::<Command>() {
            Ok(command) => {
                // Failures are already logged and published as events
                if let Err(e) = controller.execute(command).await {
                    if e.is_user_actionable() {
                        tracing::info!("Fix the audio setup and send '{}' again", other);
                    }
                }
            }
            Err(e) => tracing::warn!("{}", e),
        },
    }
    true
}

fn parse_direction(s: &str) -> Result<Direction, String> {
    Direction::from_label(s).ok_or_else(|| format!("expected rider or pillion, got '{}'", s))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::warn!("Failed to serialize output: {}", e),
    }
}

/// Print every bus event as one JSON line on stdout
fn spawn_event_printer(mut rx: broadcast::Receiver<moto_intercom::events::SystemEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_json(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged, {} events skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// CLI overrides are applied to an in-memory copy so they never rewrite the
/// config file
fn apply_overrides(store: ConfigStore, args: &CliArgs) -> ConfigStore {
    if args.direction.is_none() && !args.no_noise_suppression {
        return store;
    }

    let mut config = (*store.get()).clone();
    if let Some(direction) = args.direction {
        config.routing.default_direction = direction;
    }
    if args.no_noise_suppression {
        config.audio.noise_suppression = false;
    }
    tracing::info!("Command line overrides active, config file left untouched");
    ConfigStore::ephemeral(config)
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "moto_intercom=error",
        LogLevel::Warn => "moto_intercom=warn",
        LogLevel::Info => "moto_intercom=info",
        LogLevel::Verbose => "moto_intercom=debug,moto_intercom::audio::pipeline=info",
        LogLevel::Debug => "moto_intercom=debug",
        LogLevel::Trace => "moto_intercom=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // stdout carries the JSON event stream
    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("MOTO_INTERCOM_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(path).join("moto-intercom");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("moto-intercom");
    }
    PathBuf::from("/etc/moto-intercom")
}
