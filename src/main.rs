//! SwiftMail monitor - main entry point
//!
//! Connects to the configured broker, watches the mailbox sensor feed and
//! keeps the session alive until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use swiftmail::config::AppConfig;
use swiftmail::dispatch::LoggingHandler;
use swiftmail::mailbox::MailboxHandler;
use swiftmail::observability::init_default_logging;
use swiftmail::protocol::{validate_topic_name, TopicFilter};
use swiftmail::session::ConnectionManager;
use swiftmail::transport::MqttTransport;
use tokio::{
    signal,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["swiftmail.toml", "config/swiftmail.toml"];

/// Ticks between health log lines
const HEALTH_LOG_EVERY: u32 = 60;

/// SwiftMail mailbox monitor
#[derive(Parser)]
#[command(name = "swiftmail")]
#[command(about = "MQTT session manager and mailbox monitor")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SWIFTMAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and monitor the mailbox until interrupted
    Run,
    /// Validate the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Check whether a topic matches a subscription filter
    CheckTopic {
        /// Subscription filter, may contain + and #
        filter: String,
        /// Concrete topic name
        topic: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var_os("LOG_LEVEL").is_none() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    let result = match cli.command {
        Commands::CheckTopic { filter, topic } => check_topic(&filter, &topic),
        Commands::Run => run_monitor(startup_configuration(&cli.config)).await,
        Commands::Config { show } => {
            handle_config_command(&startup_configuration(&cli.config), show)
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

/// Load the configuration for a command that needs one, exiting on failure
fn startup_configuration(config_path: &Option<PathBuf>) -> AppConfig {
    info!("Starting SwiftMail v{}", env!("CARGO_PKG_VERSION"));
    match load_configuration(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AppConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AppConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found, pass one with -c/--config or create swiftmail.toml".into())
}

async fn run_monitor(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = config.broker.to_broker_config()?;
    let mut manager = ConnectionManager::new(MqttTransport::new(), config.retry.clone());

    let mailbox = Arc::new(MailboxHandler::from_config(&config.mailbox));
    manager
        .subscribe(config.mailbox.topic.as_str(), config.mailbox.qos, mailbox)
        .await?;
    for extra in &config.subscriptions {
        manager
            .subscribe(extra.filter.as_str(), extra.qos, Arc::new(LoggingHandler))
            .await?;
    }

    if let Err(e) = manager.connect(broker).await {
        if !manager.is_running() {
            return Err(e.into());
        }
        warn!(error = %e.redacted(), "Initial connection failed, retrying in background");
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u32 = 0;

    let outcome = loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break Ok(());
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break Ok(());
            }
            _ = ticker.tick() => {
                if !manager.is_running() {
                    break Err("broker session ended and retries are exhausted".into());
                }
                ticks = ticks.wrapping_add(1);
                if ticks % HEALTH_LOG_EVERY == 0 {
                    let health = manager.health().await;
                    info!(
                        state = ?manager.state(),
                        uptime_secs = health.uptime.map(|d| d.as_secs()),
                        reconnects = health.reconnect_count,
                        healthy = health.is_healthy,
                        "Session health"
                    );
                }
            }
        }
    };

    if let Err(e) = manager.disconnect().await {
        warn!(error = %e.redacted(), "Disconnect did not complete cleanly");
    }
    info!("SwiftMail shutdown complete");
    outcome
}

fn handle_config_command(config: &AppConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    Ok(())
}

fn check_topic(filter: &str, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = TopicFilter::new(filter)?;
    validate_topic_name(topic)?;

    if filter.matches(topic) {
        println!("'{topic}' matches '{filter}'");
    } else {
        println!("'{topic}' does not match '{filter}'");
    }
    Ok(())
}
