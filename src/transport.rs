//! Protocol-stack seam.
//!
//! The underlying OPC UA stack is used as a black box behind these traits:
//! create a session, create a subscription, add monitored items, receive
//! notifications, close. The production implementation lives in
//! [`crate::opcua`]; tests substitute a mock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::{ConnectionError, MonitorError};

/// One delivered value change for a monitored node.
///
/// The transport pushes changes in arrival order, oldest first; a single
/// protocol notification carrying a queued batch becomes one `DataChange`
/// per value.
#[derive(Debug, Clone)]
pub struct DataChange {
    /// Canonical node id string (e.g. "ns=2;i=100").
    pub node_id: String,

    /// String-encoded value; `None` when the server delivered no value.
    pub value: Option<String>,

    /// Reported quality/status code.
    pub status_code: String,

    /// Server-supplied source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// Sending half of the notification channel, handed to the transport on
/// connect. Unbounded: the bridge has no backpressure mechanism; slow
/// consumers are absorbed by the protocol stack's own buffering.
pub type DataChangeSender = mpsc::UnboundedSender<DataChange>;
pub type DataChangeReceiver = mpsc::UnboundedReceiver<DataChange>;

/// Factory for protocol sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a session against the configured server. Value changes for
    /// every monitored item of the session are delivered on `events`.
    async fn connect(
        &self,
        events: DataChangeSender,
    ) -> Result<Box<dyn ProtocolSession>, ConnectionError>;
}

/// A live protocol session. Dropped or closed together with its
/// subscriptions; nothing carries over to the next session.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Create a subscription with the given publishing interval, returning
    /// its id.
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
    ) -> Result<u32, ConnectionError>;

    /// Register a monitored item for `node_id` on the subscription and
    /// commit the change to the server. Returns the server-assigned item id.
    async fn add_monitored_item(
        &self,
        subscription_id: u32,
        node_id: &str,
    ) -> Result<u32, MonitorError>;

    /// Shut the session down. "Already closed" is success.
    async fn close(&self) -> Result<(), ConnectionError>;
}
