//! Subscription control: monitored-item registration and replay.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::OpcUaConfig;
use crate::error::{AddTagError, ConnectionError, MonitorError};
use crate::tags::{TagEntry, TagRegistry};
use crate::transport::ProtocolSession;

/// Well-known server-time node (ServerStatus_CurrentTime), monitored on
/// every subscription purely for liveness detection. It is never exposed
/// through the add-tag API and never appears in the registry.
pub const HEARTBEAT_NODE_ID: &str = "i=2258";

/// Creates subscriptions and registers monitored items on them.
pub struct SubscriptionController {
    config: OpcUaConfig,
    registry: Arc<TagRegistry>,
}

impl SubscriptionController {
    pub fn new(config: OpcUaConfig, registry: Arc<TagRegistry>) -> Self {
        Self { config, registry }
    }

    /// Create the subscription on a fresh session, add the mandatory
    /// heartbeat item, then replay a monitored item for every registered
    /// tag. Server-side state does not survive a new session; the registry
    /// is the record of what should be monitored.
    pub async fn establish(
        &self,
        session: &dyn ProtocolSession,
    ) -> Result<u32, ConnectionError> {
        let interval = Duration::from_millis(self.config.publishing_interval_ms);
        let subscription_id = session.create_subscription(interval).await?;
        debug!(subscription_id, ?interval, "Subscription created");

        match session
            .add_monitored_item(subscription_id, HEARTBEAT_NODE_ID)
            .await
        {
            Ok(_) => {}
            Err(MonitorError::Connection(e)) => return Err(e),
            Err(MonitorError::Rejected { status }) => {
                return Err(ConnectionError::Subscription(format!(
                    "heartbeat item rejected: {status}"
                )));
            }
        }

        let tags = self.registry.snapshot();
        for tag in &tags {
            match session.add_monitored_item(subscription_id, &tag.node_id).await {
                Ok(_) => debug!(node_id = %tag.node_id, display_name = %tag.display_name, "Replayed monitored item"),
                Err(MonitorError::Connection(e)) => return Err(e),
                Err(MonitorError::Rejected { status }) => {
                    // The tag stays registered; the server may accept it on
                    // a later renewal.
                    warn!(
                        node_id = %tag.node_id,
                        display_name = %tag.display_name,
                        status = %status,
                        "Server rejected replay of monitored item"
                    );
                }
            }
        }

        if !tags.is_empty() {
            info!(count = tags.len(), subscription_id, "Replayed registered tags");
        }

        Ok(subscription_id)
    }

    /// Register a new tag: duplicate check, server round-trip, and only on
    /// server acknowledgement the registry insert. The round-trip is
    /// bounded by the configured operation timeout.
    pub async fn add_tag(
        &self,
        session: &dyn ProtocolSession,
        subscription_id: u32,
        display_name: &str,
        node_id: u32,
    ) -> Result<(), AddTagError> {
        let node_id = self.config.qualified_node_id(node_id);

        if let Some(existing) = self.registry.display_name_for(&node_id) {
            return Err(AddTagError::DuplicateNode {
                node_id,
                display_name: existing,
            });
        }

        let op_timeout = Duration::from_millis(self.config.operation_timeout_ms);
        let result = tokio::time::timeout(
            op_timeout,
            session.add_monitored_item(subscription_id, &node_id),
        )
        .await
        .map_err(|_| AddTagError::Connection(ConnectionError::Timeout(op_timeout)))?;

        match result {
            Ok(_) => {}
            Err(MonitorError::Rejected { status }) => {
                return Err(AddTagError::ServerRejected { node_id, status });
            }
            Err(MonitorError::Connection(e)) => return Err(AddTagError::Connection(e)),
        }

        self.registry
            .add(TagEntry::new(display_name, node_id.as_str()))?;

        info!(display_name, node_id = %node_id, "Tag registered");
        Ok(())
    }
}
