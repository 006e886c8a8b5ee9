//! Zenoh bridge for OPC UA.
//!
//! Maintains a subscription against one OPC UA server, accepts tag
//! registrations at runtime over Zenoh, and republishes every monitored
//! value change as telemetry.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use zenoh_bridge_opcua::bridge::Bridge;
use zenoh_bridge_opcua::config::{LoggingConfig, OpcUaBridgeConfig};
use zenoh_bridge_opcua::opcua::OpcUaTransport;
use zenoh_bridge_opcua::publish::{self, ZenohSink};
use zenoh_bridge_opcua::{control, watchdog};

/// Zenoh bridge for OPC UA servers.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-opcua")]
#[command(about = "Subscribes to OPC UA tags and publishes value changes to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "opcua.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = OpcUaBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    zenoh_bridge_opcua::init_tracing(&log_config)?;

    info!("Starting zenoh-bridge-opcua");
    info!("Loaded configuration from {:?}", args.config);

    // Connect to Zenoh
    info!("Connecting to Zenoh...");
    let session = publish::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;
    let session = Arc::new(session);
    info!("Connected to Zenoh");

    let format = config.serialization;
    let key_prefix = config.opcua.key_prefix.clone();
    let endpoint = config.opcua.endpoint_url();

    let transport = Arc::new(OpcUaTransport::new(config.opcua.clone()));
    let sink = Arc::new(ZenohSink::new(
        session.clone(),
        key_prefix.clone(),
        format,
    ));

    let (bridge, dispatcher) = Bridge::new(config.opcua.clone(), transport, sink);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));
    tasks.push(tokio::spawn(watchdog::run(
        bridge.clone(),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(control::run(
        bridge.clone(),
        session.clone(),
        key_prefix.clone(),
        format,
        shutdown_rx.clone(),
    )));

    // Initial connection; failures are retried by the watchdog.
    bridge.connect_with_logging().await;

    // Publish bridge status
    let status_key = format!("{}/@/status", key_prefix);
    let status = serde_json::json!({
        "bridge": "opcua",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoint": endpoint,
        "status": "running"
    });

    if let Err(e) = session.put(&status_key, status.to_string()).await {
        error!("Failed to publish bridge status: {}", e);
    }

    info!("OPC UA bridge running");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    bridge.shutdown().await;

    // Publish offline status
    let status = serde_json::json!({
        "bridge": "opcua",
        "status": "offline"
    });
    let _ = session.put(&status_key, status.to_string()).await;

    // The Zenoh session is shared with the sink and control channel; they
    // have all stopped by now.
    match Arc::try_unwrap(session) {
        Ok(session) => {
            session
                .close()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
        }
        Err(_) => error!("Zenoh session still shared at shutdown"),
    }
    info!("OPC UA bridge stopped");

    Ok(())
}
