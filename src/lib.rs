//! Zenoh bridge for OPC UA servers.
//!
//! Maintains one long-lived OPC UA session with a single subscription,
//! registers monitored "tags" at runtime, mirrors their latest values in a
//! local registry, and republishes every value change to Zenoh.
//!
//! Key expressions:
//!
//! - `<prefix>/tags/<name>` - tag value changes
//! - `<prefix>/@/commands/tags` - runtime tag registration commands
//! - `<prefix>/@/status/tags` - registry snapshots
//! - `<prefix>/@/status` - bridge status
//!
//! Module map:
//!
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`tags`] - Tag registry and value cache
//! - [`transport`] - Protocol session trait seam
//! - [`opcua`] - Production transport over the `opcua` crate
//! - [`session`] - Session lifecycle state
//! - [`subscription`] - Subscription and monitored item management
//! - [`watchdog`] - Session renewal and liveness detection
//! - [`dispatch`] - Notification dispatch into registry and sink
//! - [`publish`] - Zenoh session and outbound event sink
//! - [`control`] - Runtime control channel
//! - [`bridge`] - Top-level orchestration
//! - [`error`] - Error types

pub mod bridge;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod opcua;
pub mod publish;
pub mod session;
pub mod subscription;
pub mod tags;
pub mod transport;
pub mod watchdog;

pub use bridge::Bridge;
pub use config::{
    CertificatePolicy, LogFormat, LoggingConfig, OpcUaBridgeConfig, OpcUaConfig, RenewalConfig,
    ZenohConfig,
};
pub use error::{AddTagError, ConnectionError, MonitorError, PublishError, RenewalError};
pub use event::{decode, encode, Format, TagChangeEvent};
pub use publish::{EventSink, ZenohSink};
pub use session::LinkState;
pub use tags::{TagEntry, TagRegistry};
pub use transport::{DataChange, ProtocolSession, Transport};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
