//! Production transport over the `opcua` crate.
//!
//! The OPC UA stack is synchronous; every server round-trip runs on a
//! blocking task so the async callers (and their timeouts) stay
//! responsive. Data-change callbacks are routed into the bridge's
//! notification channel.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use opcua::client::prelude::*;
use opcua::sync::RwLock as OpcUaRwLock;

use crate::config::{CertificatePolicy, OpcUaConfig};
use crate::error::{ConnectionError, MonitorError};
use crate::transport::{DataChange, DataChangeSender, ProtocolSession, Transport};

// Subscription tuning, matching the stack's reference client values.
const SUBSCRIPTION_LIFETIME_COUNT: u32 = 10;
const SUBSCRIPTION_MAX_KEEP_ALIVE_COUNT: u32 = 30;
const MONITORED_ITEM_QUEUE_SIZE: u32 = 10;

/// Transport backed by a real OPC UA client.
pub struct OpcUaTransport {
    config: OpcUaConfig,
}

impl OpcUaTransport {
    pub fn new(config: OpcUaConfig) -> Self {
        Self { config }
    }
}

fn build_client(config: &OpcUaConfig) -> Result<Client, ConnectionError> {
    let mut builder = ClientBuilder::new()
        .application_name(config.application_name.as_str())
        .application_uri(format!("urn:{}:{}", config.host, config.application_name))
        .create_sample_keypair(true)
        .session_timeout(config.session_timeout_ms as u32);

    // The stack exposes coarser knobs than the policy: its trust flag is
    // exactly the self-signed trust-on-first-use exception, and AcceptAll
    // additionally disables validation.
    match config.certificate_policy {
        CertificatePolicy::RejectUntrusted => {}
        CertificatePolicy::AcceptSelfSigned => {
            builder = builder.trust_server_certs(true);
        }
        CertificatePolicy::AcceptAll => {
            warn!("Certificate policy 'accept_all' disables server certificate validation");
            builder = builder.trust_server_certs(true).verify_server_certs(false);
        }
    }

    builder.client().ok_or_else(|| ConnectionError::SessionCreate {
        endpoint: config.endpoint_url(),
        reason: "failed to build OPC UA client".to_string(),
    })
}

fn security_selection(config: &OpcUaConfig) -> (SecurityPolicy, MessageSecurityMode) {
    if config.security_enabled {
        (
            SecurityPolicy::Basic256Sha256,
            MessageSecurityMode::SignAndEncrypt,
        )
    } else {
        (SecurityPolicy::None, MessageSecurityMode::None)
    }
}

fn variant_to_string(variant: &Variant) -> String {
    match variant {
        Variant::Boolean(v) => v.to_string(),
        Variant::SByte(v) => v.to_string(),
        Variant::Byte(v) => v.to_string(),
        Variant::Int16(v) => v.to_string(),
        Variant::UInt16(v) => v.to_string(),
        Variant::Int32(v) => v.to_string(),
        Variant::UInt32(v) => v.to_string(),
        Variant::Int64(v) => v.to_string(),
        Variant::UInt64(v) => v.to_string(),
        Variant::Float(v) => v.to_string(),
        Variant::Double(v) => v.to_string(),
        Variant::String(v) => v.as_ref().to_string(),
        Variant::DateTime(v) => v.as_chrono().to_rfc3339(),
        other => format!("{:?}", other),
    }
}

/// Translate one changed monitored item into a [`DataChange`].
fn to_data_change(item: &MonitoredItem) -> DataChange {
    let data_value = item.last_value();
    DataChange {
        node_id: item.item_to_monitor().node_id.to_string(),
        value: data_value.value.as_ref().map(variant_to_string),
        status_code: data_value
            .status
            .map(|s| format!("{:?}", s))
            .unwrap_or_else(|| "Good".to_string()),
        source_timestamp: data_value.source_timestamp.map(|t| t.as_chrono()),
    }
}

#[async_trait]
impl Transport for OpcUaTransport {
    async fn connect(
        &self,
        events: DataChangeSender,
    ) -> Result<Box<dyn ProtocolSession>, ConnectionError> {
        let config = self.config.clone();
        let endpoint_url = config.endpoint_url();

        let session = tokio::task::spawn_blocking(move || {
            let client = build_client(&config)?;

            let endpoints = client
                .get_server_endpoints_from_url(&config.endpoint_url())
                .map_err(|e| ConnectionError::Discovery {
                    endpoint: config.endpoint_url(),
                    reason: e.to_string(),
                })?;

            let (security_policy, security_mode) = security_selection(&config);
            let endpoint = endpoints
                .iter()
                .find(|e| {
                    e.security_policy_uri.as_ref() == security_policy.to_uri()
                        && e.security_mode == security_mode
                })
                .cloned()
                .ok_or_else(|| ConnectionError::NoMatchingEndpoint {
                    endpoint: config.endpoint_url(),
                    policy: format!("{:?}/{:?}", security_policy, security_mode),
                })?;

            debug!(
                security_policy = %endpoint.security_policy_uri,
                security_mode = ?endpoint.security_mode,
                "Selected endpoint"
            );

            let mut client = client;
            client
                .connect_to_endpoint(endpoint, IdentityToken::Anonymous)
                .map_err(|status| ConnectionError::SessionCreate {
                    endpoint: config.endpoint_url(),
                    reason: format!("{:?}", status),
                })
        })
        .await
        .map_err(|e| ConnectionError::SessionCreate {
            endpoint: endpoint_url,
            reason: format!("connect task failed: {e}"),
        })??;

        Ok(Box::new(OpcUaSession {
            session,
            config: self.config.clone(),
            events,
        }))
    }
}

/// One live session on the real stack.
struct OpcUaSession {
    session: Arc<OpcUaRwLock<Session>>,
    config: OpcUaConfig,
    events: DataChangeSender,
}

#[async_trait]
impl ProtocolSession for OpcUaSession {
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
    ) -> Result<u32, ConnectionError> {
        let session = self.session.clone();
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let session = session.read();
            session
                .create_subscription(
                    publishing_interval.as_millis() as f64,
                    SUBSCRIPTION_LIFETIME_COUNT,
                    SUBSCRIPTION_MAX_KEEP_ALIVE_COUNT,
                    0,
                    0,
                    true,
                    DataChangeCallback::new(move |changed_monitored_items| {
                        for item in changed_monitored_items.iter() {
                            // Dispatcher gone means the bridge is shutting
                            // down; drop the change.
                            let _ = events.send(to_data_change(item));
                        }
                    }),
                )
                .map_err(|status| {
                    ConnectionError::Subscription(format!(
                        "create subscription failed: {:?}",
                        status
                    ))
                })
        })
        .await
        .map_err(|e| ConnectionError::Subscription(format!("subscription task failed: {e}")))?
    }

    async fn add_monitored_item(
        &self,
        subscription_id: u32,
        node_id: &str,
    ) -> Result<u32, MonitorError> {
        let parsed = NodeId::from_str(node_id).map_err(|_| MonitorError::Rejected {
            status: format!("invalid node id '{node_id}'"),
        })?;

        let session = self.session.clone();
        let sampling_interval = self.config.publishing_interval_ms as f64;

        let result = tokio::task::spawn_blocking(move || {
            let request = MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId {
                    node_id: parsed,
                    attribute_id: AttributeId::Value as u32,
                    index_range: UAString::null(),
                    data_encoding: QualifiedName::null(),
                },
                monitoring_mode: MonitoringMode::Reporting,
                requested_parameters: MonitoringParameters {
                    client_handle: 0,
                    sampling_interval,
                    filter: ExtensionObject::null(),
                    queue_size: MONITORED_ITEM_QUEUE_SIZE,
                    discard_oldest: true,
                },
            };

            let session = session.read();
            session
                .create_monitored_items(subscription_id, TimestampsToReturn::Both, &[request])
                .map_err(|status| {
                    MonitorError::Connection(ConnectionError::Subscription(format!(
                        "create monitored items failed: {:?}",
                        status
                    )))
                })
        })
        .await
        .map_err(|e| {
            MonitorError::Connection(ConnectionError::Subscription(format!(
                "monitored item task failed: {e}"
            )))
        })??;

        let created = result.first().ok_or_else(|| MonitorError::Rejected {
            status: "server returned no result".to_string(),
        })?;

        if created.status_code.is_good() {
            Ok(created.monitored_item_id)
        } else {
            Err(MonitorError::Rejected {
                status: format!("{:?}", created.status_code),
            })
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let session = session.read();
            session.disconnect();
        })
        .await
        .map_err(|e| ConnectionError::SessionCreate {
            endpoint: self.config.endpoint_url(),
            reason: format!("close task failed: {e}"),
        })?;
        Ok(())
    }
}
