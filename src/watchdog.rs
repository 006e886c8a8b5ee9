//! Session renewal watchdog.
//!
//! One perpetual background loop polling at a short fixed interval. Each
//! tick evaluates two independent reconnection triggers: the scheduled
//! renewal period and heartbeat staleness. Reconnection failures are
//! logged and retried next tick, forever; total server unavailability
//! degrades to a stale cache, never a crash.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::bridge::Bridge;
use crate::config::RenewalConfig;
use crate::error::RenewalError;
use crate::session::LinkState;

/// Monotonic clock of the last heartbeat delivery, shared between the
/// notification dispatcher (writer) and the watchdog (reader).
#[derive(Debug)]
pub struct StalenessClock {
    last_seen: Mutex<Instant>,
}

impl StalenessClock {
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Mark the heartbeat as seen now.
    pub fn touch(&self) {
        let mut last = self.last_seen.lock().expect("staleness clock poisoned");
        *last = Instant::now();
    }

    /// Time since the heartbeat was last seen.
    pub fn elapsed(&self) -> Duration {
        let last = self.last_seen.lock().expect("staleness clock poisoned");
        last.elapsed()
    }
}

impl Default for StalenessClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a watchdog tick decided to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    NotConnected,
    RenewalDue,
    HeartbeatStale,
}

/// Run the watchdog until the shutdown signal flips.
pub async fn run(bridge: Arc<Bridge>, mut shutdown: watch::Receiver<bool>) {
    let cfg: RenewalConfig = bridge.renewal_config().clone();
    let period = Duration::from_secs(cfg.period_secs);
    let staleness = Duration::from_secs(cfg.staleness_secs);

    let mut ticker = interval(Duration::from_secs(cfg.poll_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        poll_interval_secs = cfg.poll_interval_secs,
        renewal_enabled = cfg.session_renewal_required,
        renewal_period_secs = cfg.period_secs,
        staleness_secs = cfg.staleness_secs,
        "Renewal watchdog started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    info!("Renewal watchdog stopping");
                    return;
                }
                continue;
            }
        }

        let Some(trigger) = evaluate(&bridge, &cfg, period, staleness).await else {
            continue;
        };

        match trigger {
            Trigger::NotConnected => info!("Session not established; attempting connection"),
            Trigger::RenewalDue => info!("Session renewal period elapsed; renewing session"),
            Trigger::HeartbeatStale => warn!(
                stale_for_secs = bridge.heartbeat_elapsed().as_secs(),
                "Heartbeat stale; renewing session"
            ),
        }

        if let Err(e) = bridge.reestablish().await.map_err(RenewalError::from) {
            // Retry on the next tick; the poll interval bounds the retry
            // rate.
            error!(error = %e, "Reconnection attempt failed");
        }
    }
}

async fn evaluate(
    bridge: &Bridge,
    cfg: &RenewalConfig,
    period: Duration,
    staleness: Duration,
) -> Option<Trigger> {
    let state = bridge.state().await;
    if state != LinkState::Connected {
        return Some(Trigger::NotConnected);
    }

    if cfg.session_renewal_required {
        let renewed = bridge.last_renewed().await;
        if renewed.map_or(true, |at| at.elapsed() > period) {
            return Some(Trigger::RenewalDue);
        }
    }

    if bridge.heartbeat_elapsed() > staleness {
        return Some(Trigger::HeartbeatStale);
    }

    None
}
