//! Runtime control channel.
//!
//! Tag registration requests arrive over Zenoh on an administrative key
//! (the `@` segment marks the control namespace). This replaces a separate
//! request-handling layer: anything that can put a small JSON payload onto
//! the bus can register tags.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bridge::Bridge;
use crate::event::{encode, Format};
use crate::tags::TagEntry;

/// Key expression for tag commands.
pub fn command_key(prefix: &str) -> String {
    format!("{}/@/commands/tags", prefix)
}

/// Key expression for registry status snapshots.
pub fn status_key(prefix: &str) -> String {
    format!("{}/@/status/tags", prefix)
}

/// Command sent to the bridge over the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TagCommand {
    /// Register a monitored point under a display name.
    AddTag {
        /// Display name, unique within the registry.
        name: String,
        /// Numeric node id; qualified with the configured namespace index.
        node_id: u32,
    },
    /// Request a registry snapshot on the status key.
    GetStatus,
}

/// Registry snapshot published in response to `GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagStatus {
    pub tags: Vec<TagEntry>,
}

/// Listen for commands until shutdown is signaled.
pub async fn run(
    bridge: Arc<Bridge>,
    session: Arc<zenoh::Session>,
    prefix: String,
    format: Format,
    mut shutdown: watch::Receiver<bool>,
) {
    let key = command_key(&prefix);
    let subscriber = match session.declare_subscriber(&key).await {
        Ok(sub) => sub,
        Err(e) => {
            error!(key = %key, error = %e, "Failed to subscribe to control channel");
            return;
        }
    };

    info!(key = %key, "Control channel listening");

    loop {
        tokio::select! {
            sample = subscriber.recv_async() => {
                match sample {
                    Ok(sample) => {
                        let payload = sample.payload().to_bytes();
                        match serde_json::from_slice::<TagCommand>(&payload) {
                            Ok(command) => {
                                handle(&bridge, &session, &prefix, format, command).await;
                            }
                            Err(e) => {
                                warn!(key = %sample.key_expr(), error = %e, "Invalid tag command dropped");
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Control subscriber error");
                        return;
                    }
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    info!("Control channel stopping");
                    return;
                }
            }
        }
    }
}

async fn handle(
    bridge: &Bridge,
    session: &zenoh::Session,
    prefix: &str,
    format: Format,
    command: TagCommand,
) {
    match command {
        TagCommand::AddTag { name, node_id } => {
            match bridge.add_monitoring_item(&name, node_id).await {
                Ok(()) => info!(name = %name, node_id, "Tag added via control channel"),
                // Duplicates are a caller mistake, not a bridge failure.
                Err(e) => warn!(name = %name, node_id, error = %e, "Add tag request failed"),
            }
        }
        TagCommand::GetStatus => {
            let status = TagStatus {
                tags: bridge.snapshot(),
            };
            let key = status_key(prefix);
            match encode(&status, format) {
                Ok(payload) => {
                    if let Err(e) = session.put(&key, payload).await {
                        warn!(key = %key, error = %e, "Failed to publish tag status");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode tag status"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_key() {
        assert_eq!(command_key("opcua"), "opcua/@/commands/tags");
    }

    #[test]
    fn test_status_key() {
        assert_eq!(status_key("plant/opcua"), "plant/opcua/@/status/tags");
    }

    #[test]
    fn test_deserialize_add_tag() {
        let json = r#"{"type": "add_tag", "name": "Temp1", "node_id": 100}"#;
        let cmd: TagCommand = serde_json::from_str(json).unwrap();
        match cmd {
            TagCommand::AddTag { name, node_id } => {
                assert_eq!(name, "Temp1");
                assert_eq!(node_id, 100);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_get_status() {
        let json = r#"{"type": "get_status"}"#;
        let cmd: TagCommand = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, TagCommand::GetStatus));
    }

    #[test]
    fn test_serialize_add_tag() {
        let cmd = TagCommand::AddTag {
            name: "Flow3".to_string(),
            node_id: 42,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("add_tag"));
        assert!(json.contains("Flow3"));
        assert!(json.contains("42"));
    }
}
