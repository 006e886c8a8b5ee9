//! Session lifecycle management.
//!
//! The [`SessionManager`] owns establishing and disposing protocol
//! sessions; [`SharedLink`] is the single mutual-exclusion domain guarding
//! the live session handle and its subscription, shared between the
//! add-tag entry point and the renewal watchdog.

use std::fmt;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::OpcUaConfig;
use crate::error::ConnectionError;
use crate::transport::{DataChangeSender, ProtocolSession, Transport};

/// Lifecycle state of the bridge's single protocol link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Renewing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Renewing => write!(f, "renewing"),
        }
    }
}

/// A live session together with the subscription created on it. Both are
/// invalidated together on renewal.
pub struct ActiveLink {
    pub session: Box<dyn ProtocolSession>,
    pub subscription_id: u32,
}

/// State guarded by the link mutex.
#[derive(Default)]
pub struct LinkInner {
    pub state: LinkState,
    pub active: Option<ActiveLink>,
    pub last_renewed: Option<Instant>,
}

/// The single mutual-exclusion domain for session/subscription handle
/// swaps.
#[derive(Default)]
pub struct SharedLink {
    inner: Mutex<LinkInner>,
}

impl SharedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().await
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    pub async fn last_renewed(&self) -> Option<Instant> {
        self.inner.lock().await.last_renewed
    }
}

/// Establishes and disposes protocol sessions.
///
/// Reconnection is a fresh `connect`; no session-side state carries over.
pub struct SessionManager {
    config: OpcUaConfig,
    transport: std::sync::Arc<dyn Transport>,
}

impl SessionManager {
    pub fn new(config: OpcUaConfig, transport: std::sync::Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Establish a session. Notifications for all monitored items of the
    /// session will be delivered on `events`.
    pub async fn connect(
        &self,
        events: DataChangeSender,
    ) -> Result<Box<dyn ProtocolSession>, ConnectionError> {
        info!(
            endpoint = %self.config.endpoint_url(),
            security_enabled = self.config.security_enabled,
            certificate_policy = self.config.certificate_policy.as_str(),
            "Establishing OPC UA session"
        );
        let session = self.transport.connect(events).await?;
        info!(endpoint = %self.config.endpoint_url(), "OPC UA session established");
        Ok(session)
    }

    /// Shut a session down, tolerating "already closed" and any teardown
    /// error: the handle is discarded either way.
    pub async fn close(&self, session: Box<dyn ProtocolSession>) {
        if let Err(e) = session.close().await {
            debug!(error = %e, "Session close reported an error (ignored)");
        }
    }
}
