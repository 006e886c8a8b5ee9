//! Error types for the OPC UA bridge.
//!
//! Errors on the request path (adding a tag) surface to the caller as typed
//! results. Errors on background paths (watchdog, notification delivery,
//! publishing) are logged and absorbed so the bridge keeps running.

use std::time::Duration;

use thiserror::Error;

/// Session-layer failures: endpoint discovery, session creation, or a
/// subscription request against a dead session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("endpoint discovery failed for {endpoint}: {reason}")]
    Discovery { endpoint: String, reason: String },

    #[error("no endpoint at {endpoint} matches security policy '{policy}'")]
    NoMatchingEndpoint { endpoint: String, policy: String },

    #[error("session creation failed for {endpoint}: {reason}")]
    SessionCreate { endpoint: String, reason: String },

    #[error("subscription request failed: {0}")]
    Subscription(String),

    #[error("no session is established")]
    NotConnected,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Server response to a single monitored-item request.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("server rejected the monitored item: {status}")]
    Rejected { status: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Failures surfaced to the caller of the add-tag entry point.
#[derive(Debug, Error)]
pub enum AddTagError {
    #[error("node {node_id} is already monitored as '{display_name}'")]
    DuplicateNode {
        node_id: String,
        display_name: String,
    },

    #[error("tag '{display_name}' is already registered")]
    DuplicateName { display_name: String },

    #[error("server rejected monitored item for {node_id}: {status}")]
    ServerRejected { node_id: String, status: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Outbound (Zenoh) failures. The dispatcher logs and swallows these;
/// they never affect registry state.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid zenoh configuration: {0}")]
    Config(String),

    #[error("zenoh session error: {0}")]
    Session(String),

    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to publish to '{key}': {message}")]
    Put { key: String, message: String },
}

/// A failed watchdog renewal cycle. Logged; the loop retries next tick.
#[derive(Debug, Error)]
#[error("session renewal failed: {source}")]
pub struct RenewalError {
    #[from]
    source: ConnectionError,
}
