//! Command-line front end for the messaging client
//!
//! Listens on topic patterns, publishes single messages and validates
//! configuration files.

use clap::{Parser, Subcommand};
use serde_json::Value;
use service_messaging::client::{ConnectionState, HandlerResult, MessagingClient};
use service_messaging::config::ClientConfig;
use service_messaging::observability::init_default_logging;
use service_messaging::protocol::{Message, Payload, QoS};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Service messaging client
#[derive(Parser)]
#[command(name = "mqtt-service")]
#[command(about = "Publish and listen on an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, used when no configuration file is found
    #[arg(long, env = "MQTT_BROKER_URL", value_name = "URL")]
    broker: Option<String>,

    /// Service name, used when no configuration file is found
    #[arg(long, default_value = "mqtt-service")]
    service: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log every message matching the given patterns until interrupted
    Listen {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Publish one JSON message
    Publish {
        topic: String,
        /// JSON payload
        payload: String,
        /// QoS level (0, 1 or 2)
        #[arg(long)]
        qos: Option<u8>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Listen { patterns } => listen(config, patterns).await,
        Commands::Publish {
            topic,
            payload,
            qos,
        } => publish(config, &topic, &payload, qos).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.config {
        info!("Loading configuration from: {}", path.display());
        return Ok(ClientConfig::load_from_file(path)?);
    }

    for path_str in ["mqtt-service.toml", "config/mqtt-service.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ClientConfig::load_from_file(&path)?);
        }
    }

    match &cli.broker {
        Some(url) => {
            let config = ClientConfig::new(cli.service.clone(), url.clone());
            config.validate()?;
            Ok(config)
        }
        None => Err("no configuration file found; pass -c/--config or --broker".into()),
    }
}

async fn log_message(message: Message) -> HandlerResult {
    match &message.payload {
        Payload::Json(value) => info!(
            topic = %message.topic,
            pattern = %message.pattern,
            payload = %value,
            "Message received"
        ),
        Payload::Raw(bytes) => info!(
            topic = %message.topic,
            pattern = %message.pattern,
            size = bytes.len(),
            text = message.payload.as_text().unwrap_or("<binary>"),
            "Raw message received"
        ),
    }
    Ok(())
}

async fn listen(config: ClientConfig, patterns: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let client = MessagingClient::from_config(config)?;

    for pattern in &patterns {
        client.on_message(pattern, log_message).await?;
    }

    client.connect().await?;
    info!(patterns = ?patterns, "Listening, press Ctrl-C to stop");

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut state_rx = client.watch_state();

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = state_rx.wait_for(|state| *state == ConnectionState::Closed) => {
            warn!("Connection permanently lost, stopping");
        }
    }

    client.disconnect().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn publish(
    config: ClientConfig,
    topic: &str,
    payload: &str,
    qos: Option<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    let value: Value = serde_json::from_str(payload)?;
    let client = MessagingClient::from_config(config)?;
    let qos = match qos {
        Some(level) => QoS::try_from(level)?,
        None => client.default_qos(),
    };

    client.connect().await?;
    let result = client.publish_with_qos(topic, &value, qos).await;
    client.disconnect().await?;
    result?;

    info!(topic, "Message published");
    Ok(())
}

fn handle_config_command(config: ClientConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
