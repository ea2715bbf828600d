//! sensorbus - Main Entry Point
//!
//! Runs either the temperature publisher or the temperature subscriber
//! until SIGINT/SIGTERM.

use clap::{Parser, Subcommand};
use sensorbus::config::{ConfigError, SensorConfig};
use sensorbus::error::AppResult;
use sensorbus::lifecycle::ConnectionManager;
use sensorbus::observability::{init_default_logging, HealthServer};
use sensorbus::transport::mqtt::MqttBrokerClient;
use sensorbus::worker::{ConsumerWorker, LogSink, ProducerWorker, RandomTemperature, Subscription};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Resilient MQTT temperature publisher and subscriber
#[derive(Parser)]
#[command(name = "sensorbus")]
#[command(about = "Resilient MQTT temperature publisher and subscriber")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a temperature reading on a fixed cadence
    Publish,
    /// Subscribe to the temperature topic and log every reading
    Subscribe,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting sensorbus v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Publish => run_publisher(config).await,
        Commands::Subscribe => run_subscriber(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<SensorConfig, ConfigError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return SensorConfig::load_from_file(path);
    }

    for path_str in ["sensorbus.toml", "config/sensorbus.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return SensorConfig::load_from_file(&path);
        }
    }

    info!("No configuration file found, using built-in defaults");
    Ok(SensorConfig::default())
}

fn build_manager(config: &SensorConfig, role: &str) -> AppResult<ConnectionManager> {
    let client = MqttBrokerClient::new(config.client_id_for(role), &config.broker)?;
    info!(
        client_id = client.client_id(),
        "Using broker {}", config.broker.url
    );
    Ok(ConnectionManager::new(
        Arc::new(client),
        config.connection.clone(),
        config.reconnect_interval(),
    ))
}

fn start_health_server(config: &SensorConfig, role: &str, manager: &Arc<ConnectionManager>) {
    if !config.health.enabled {
        return;
    }
    let server = Arc::new(HealthServer::new(role, config.health.port, manager.clone()));
    tokio::spawn(server.start());
}

async fn run_publisher(config: SensorConfig) -> AppResult<()> {
    let manager = Arc::new(build_manager(&config, "publisher")?);
    start_health_server(&config, "publisher", &manager);

    manager.initialize().await?;

    let source = RandomTemperature::new(config.publisher.min_reading, config.publisher.max_reading);
    let producer = ProducerWorker::new(manager.clone(), Box::new(source), &config.telemetry.topic)
        .with_qos(config.telemetry.qos)
        .with_retain(config.publisher.retain);

    let (stop_tx, stop_rx) = watch::channel(false);
    let interval = config.publish_interval();
    let producer_task = tokio::spawn(async move { producer.run(interval, stop_rx).await });

    wait_for_shutdown_signal().await?;

    let _ = stop_tx.send(true);
    if let Err(e) = producer_task.await {
        error!("Producer task ended abnormally: {}", e);
    }
    manager.shutdown().await;
    Ok(())
}

async fn run_subscriber(config: SensorConfig) -> AppResult<()> {
    let consumer = Arc::new(ConsumerWorker::new(
        Subscription::new(&config.telemetry.topic, config.telemetry.qos),
        Arc::new(LogSink),
    ));
    let manager = Arc::new(build_manager(&config, "subscriber")?.with_handler(consumer));
    start_health_server(&config, "subscriber", &manager);

    manager.initialize().await?;
    info!("Subscriber running on topic {}", config.telemetry.topic);

    wait_for_shutdown_signal().await?;

    manager.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown_signal() -> AppResult<()> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    Ok(())
}

fn handle_config_command(config: &SensorConfig, show: bool) -> AppResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
