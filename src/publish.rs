//! Outbound publishing to Zenoh.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ZenohConfig;
use crate::error::PublishError;
use crate::event::{encode, Format, TagChangeEvent};

/// Connect to Zenoh using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<zenoh::Session, PublishError> {
    let mut zenoh_config = zenoh::Config::default();

    let mode_str = match config.mode.as_str() {
        "client" | "peer" | "router" => format!("\"{}\"", config.mode),
        other => {
            return Err(PublishError::Config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    };

    zenoh_config
        .insert_json5("mode", &mode_str)
        .map_err(|e| PublishError::Config(format!("Failed to set mode: {}", e)))?;

    if !config.connect.is_empty() {
        let endpoints_json = serde_json::to_string(&config.connect)
            .map_err(|e| PublishError::Config(format!("Failed to serialize endpoints: {}", e)))?;
        zenoh_config
            .insert_json5("connect/endpoints", &endpoints_json)
            .map_err(|e| PublishError::Config(format!("Failed to set connect endpoints: {}", e)))?;
    }

    if !config.listen.is_empty() {
        let endpoints_json = serde_json::to_string(&config.listen)
            .map_err(|e| PublishError::Config(format!("Failed to serialize endpoints: {}", e)))?;
        zenoh_config
            .insert_json5("listen/endpoints", &endpoints_json)
            .map_err(|e| PublishError::Config(format!("Failed to set listen endpoints: {}", e)))?;
    }

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config)
        .await
        .map_err(|e| PublishError::Session(e.to_string()))?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

/// Destination for normalized tag-change events.
///
/// Delivery semantics beyond a single put are the consumer's concern;
/// the bridge treats publishing as best-effort.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &TagChangeEvent) -> Result<(), PublishError>;
}

/// Publishes tag-change events to Zenoh under
/// `<prefix>/tags/<display_name>`.
#[derive(Clone)]
pub struct ZenohSink {
    session: Arc<zenoh::Session>,
    key_prefix: String,
    format: Format,
}

impl ZenohSink {
    pub fn new(session: Arc<zenoh::Session>, key_prefix: impl Into<String>, format: Format) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
            format,
        }
    }

    /// Key expression for a tag's change events.
    pub fn event_key(&self, display_name: &str) -> String {
        format!("{}/tags/{}", self.key_prefix, display_name)
    }
}

#[async_trait]
impl EventSink for ZenohSink {
    async fn publish(&self, event: &TagChangeEvent) -> Result<(), PublishError> {
        let key = self.event_key(&event.display_name);
        let payload = encode(event, self.format)?;

        self.session
            .put(&key, payload)
            .await
            .map_err(|e| PublishError::Put {
                key: key.clone(),
                message: e.to_string(),
            })?;

        debug!(key = %key, node_id = %event.node_id, "Published tag change");
        Ok(())
    }
}
