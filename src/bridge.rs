//! Bridge orchestration: wires the session manager, subscription
//! controller, tag registry, and notification dispatcher together, and
//! exposes the add-tag entry point shared by the control channel and
//! embedders.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{OpcUaConfig, RenewalConfig};
use crate::dispatch::Dispatcher;
use crate::error::{AddTagError, ConnectionError};
use crate::publish::EventSink;
use crate::session::{ActiveLink, LinkState, SessionManager, SharedLink};
use crate::subscription::SubscriptionController;
use crate::tags::{TagEntry, TagRegistry};
use crate::transport::{DataChangeSender, Transport};
use crate::watchdog::StalenessClock;

/// The session and subscription lifecycle manager.
pub struct Bridge {
    registry: Arc<TagRegistry>,
    sessions: SessionManager,
    controller: SubscriptionController,
    link: SharedLink,
    heartbeat: Arc<StalenessClock>,
    events_tx: DataChangeSender,
    renewal: RenewalConfig,
}

impl Bridge {
    /// Build a bridge and its dispatcher. The dispatcher owns the
    /// receiving half of the notification channel and is meant to be
    /// spawned by the caller.
    pub fn new(
        config: OpcUaConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> (Arc<Self>, Dispatcher) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(TagRegistry::new());
        let heartbeat = Arc::new(StalenessClock::new());

        let bridge = Arc::new(Self {
            registry: registry.clone(),
            sessions: SessionManager::new(config.clone(), transport),
            controller: SubscriptionController::new(config.clone(), registry.clone()),
            link: SharedLink::new(),
            heartbeat: heartbeat.clone(),
            events_tx,
            renewal: config.renewal,
        });

        let dispatcher = Dispatcher::new(registry, sink, heartbeat, events_rx);
        (bridge, dispatcher)
    }

    /// Tear down any current session and establish a fresh one with its
    /// subscription, heartbeat item, and a replay of all registered tags.
    ///
    /// Used for the initial connection and by the watchdog. On failure the
    /// link is left disconnected; the watchdog retries on its next tick.
    pub async fn reestablish(&self) -> Result<(), ConnectionError> {
        let mut link = self.link.lock().await;

        if let Some(active) = link.active.take() {
            link.state = LinkState::Renewing;
            self.sessions.close(active.session).await;
        } else {
            link.state = LinkState::Connecting;
        }

        let session = match self.sessions.connect(self.events_tx.clone()).await {
            Ok(session) => session,
            Err(e) => {
                link.state = LinkState::Disconnected;
                return Err(e);
            }
        };

        let subscription_id = match self.controller.establish(session.as_ref()).await {
            Ok(id) => id,
            Err(e) => {
                self.sessions.close(session).await;
                link.state = LinkState::Disconnected;
                return Err(e);
            }
        };

        link.active = Some(ActiveLink {
            session,
            subscription_id,
        });
        link.state = LinkState::Connected;
        link.last_renewed = Some(Instant::now());
        drop(link);

        // Grant the new session one full staleness window before the
        // liveness trigger can fire again.
        self.heartbeat.touch();

        Ok(())
    }

    /// Register a monitored point. Returns after the server has
    /// acknowledged the subscription change.
    pub async fn add_monitoring_item(
        &self,
        display_name: &str,
        node_id: u32,
    ) -> Result<(), AddTagError> {
        let link = self.link.lock().await;
        let Some(active) = link.active.as_ref() else {
            return Err(AddTagError::Connection(ConnectionError::NotConnected));
        };
        self.controller
            .add_tag(
                active.session.as_ref(),
                active.subscription_id,
                display_name,
                node_id,
            )
            .await
    }

    /// Close the current session, if any, and mark the link disconnected.
    pub async fn shutdown(&self) {
        let mut link = self.link.lock().await;
        if let Some(active) = link.active.take() {
            self.sessions.close(active.session).await;
        }
        link.state = LinkState::Disconnected;
        info!("Bridge shut down");
    }

    /// Look up a tag by display name.
    pub fn get_tag(&self, display_name: &str) -> Option<TagEntry> {
        self.registry.get(display_name)
    }

    /// Point-in-time copy of the whole registry.
    pub fn snapshot(&self) -> Vec<TagEntry> {
        self.registry.snapshot()
    }

    pub async fn state(&self) -> LinkState {
        self.link.state().await
    }

    pub async fn last_renewed(&self) -> Option<Instant> {
        self.link.last_renewed().await
    }

    /// Time since the heartbeat item last delivered a value.
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.heartbeat.elapsed()
    }

    pub fn renewal_config(&self) -> &RenewalConfig {
        &self.renewal
    }

    /// Attempt the initial connection, logging instead of failing: the
    /// watchdog keeps retrying while the server is unreachable.
    pub async fn connect_with_logging(&self) {
        if let Err(e) = self.reestablish().await {
            warn!(error = %e, "Initial connection failed; watchdog will retry");
        }
    }
}
