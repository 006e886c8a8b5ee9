//! Notification dispatch: value changes into the registry and onto Zenoh.

use std::sync::Arc;

use chrono::Local;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::event::TagChangeEvent;
use crate::publish::EventSink;
use crate::subscription::HEARTBEAT_NODE_ID;
use crate::tags::TagRegistry;
use crate::transport::{DataChange, DataChangeReceiver};
use crate::watchdog::StalenessClock;

/// Consumes delivered value changes in arrival order, updates the tag
/// registry, and forwards normalized events to the outbound sink.
pub struct Dispatcher {
    registry: Arc<TagRegistry>,
    sink: Arc<dyn EventSink>,
    heartbeat: Arc<StalenessClock>,
    events: DataChangeReceiver,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TagRegistry>,
        sink: Arc<dyn EventSink>,
        heartbeat: Arc<StalenessClock>,
        events: DataChangeReceiver,
    ) -> Self {
        Self {
            registry,
            sink,
            heartbeat,
            events,
        }
    }

    /// Process notifications until the channel closes or shutdown is
    /// signaled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                change = self.events.recv() => {
                    match change {
                        Some(change) => self.handle(change).await,
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Dispatcher stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, change: DataChange) {
        // The heartbeat item only feeds liveness detection. It never
        // touches the registry and never produces an outbound event.
        if change.node_id == HEARTBEAT_NODE_ID {
            self.heartbeat.touch();
            return;
        }

        let Some(display_name) = self.registry.display_name_for(&change.node_id) else {
            // Possible transiently while a renewal tears the old session
            // down.
            debug!(node_id = %change.node_id, "Data change for unregistered node dropped");
            return;
        };

        let source_ts = change.source_timestamp.map(|t| t.with_timezone(&Local));
        match &change.value {
            Some(value) => {
                self.registry
                    .record_value(&display_name, value, &change.status_code, source_ts);
            }
            None => {
                self.registry
                    .record_absent(&display_name, &change.status_code, source_ts);
            }
        }

        let event = TagChangeEvent {
            node_id: change.node_id,
            display_name,
            value: change.value,
        };

        // Best-effort: a failed publish never affects the registry update
        // or subsequent notifications.
        if let Err(e) = self.sink.publish(&event).await {
            warn!(
                error = %e,
                node_id = %event.node_id,
                display_name = %event.display_name,
                "Failed to publish tag change"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::tags::TagEntry;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Sink that records published events and can be told to fail.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TagChangeEvent>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: &TagChangeEvent) -> Result<(), PublishError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(PublishError::Put {
                    key: "test".into(),
                    message: "sink down".into(),
                });
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Fixture {
        registry: Arc<TagRegistry>,
        sink: Arc<RecordingSink>,
        heartbeat: Arc<StalenessClock>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> (Fixture, mpsc::UnboundedSender<DataChange>) {
        let registry = Arc::new(TagRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let heartbeat = Arc::new(StalenessClock::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            registry.clone(),
            sink.clone(),
            heartbeat.clone(),
            rx,
        );
        (
            Fixture {
                registry,
                sink,
                heartbeat,
                dispatcher,
            },
            tx,
        )
    }

    fn change(node_id: &str, value: Option<&str>) -> DataChange {
        DataChange {
            node_id: node_id.to_string(),
            value: value.map(|v| v.to_string()),
            status_code: "Good".to_string(),
            source_timestamp: Some(Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_present_value_updates_registry_and_publishes() {
        let (fx, _tx) = fixture();
        fx.registry.add(TagEntry::new("Temp1", "ns=2;i=100")).unwrap();

        fx.dispatcher.handle(change("ns=2;i=100", Some("72.5"))).await;

        let entry = fx.registry.get("Temp1").unwrap();
        assert_eq!(entry.current_value.as_deref(), Some("72.5"));
        assert_eq!(entry.last_good_value.as_deref(), Some("72.5"));
        assert_eq!(entry.status_code, "Good");
        assert!(entry.last_source_timestamp.is_some());
        assert!(entry.last_updated_time.is_some());

        let events = fx.sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            TagChangeEvent {
                node_id: "ns=2;i=100".into(),
                display_name: "Temp1".into(),
                value: Some("72.5".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_absent_value_keeps_last_good() {
        let (fx, _tx) = fixture();
        fx.registry.add(TagEntry::new("Temp1", "ns=2;i=100")).unwrap();

        fx.dispatcher.handle(change("ns=2;i=100", Some("72.5"))).await;
        let mut absent = change("ns=2;i=100", None);
        absent.status_code = "BadNoCommunication".to_string();
        fx.dispatcher.handle(absent).await;

        let entry = fx.registry.get("Temp1").unwrap();
        assert_eq!(entry.current_value, None);
        assert_eq!(entry.last_good_value.as_deref(), Some("72.5"));
        assert_eq!(entry.status_code, "BadNoCommunication");
        assert!(entry.last_source_timestamp.is_some());

        // Both deliveries produced an event, absent value included.
        let events = fx.sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].value, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_isolated() {
        use std::time::Duration;

        let (fx, _tx) = fixture();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(fx.heartbeat.elapsed() >= Duration::from_secs(5));

        fx.dispatcher.handle(change(HEARTBEAT_NODE_ID, Some("now"))).await;

        assert!(fx.heartbeat.elapsed() < Duration::from_secs(1));
        assert!(fx.registry.is_empty());
        assert!(fx.sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_affect_registry_or_later_events() {
        let (fx, _tx) = fixture();
        fx.registry.add(TagEntry::new("Temp1", "ns=2;i=100")).unwrap();

        fx.sink.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        fx.dispatcher.handle(change("ns=2;i=100", Some("71.0"))).await;

        // Registry updated despite the failed publish.
        let entry = fx.registry.get("Temp1").unwrap();
        assert_eq!(entry.current_value.as_deref(), Some("71.0"));

        fx.sink.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        fx.dispatcher.handle(change("ns=2;i=100", Some("72.0"))).await;

        let events = fx.sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value.as_deref(), Some("72.0"));
    }

    #[tokio::test]
    async fn test_unregistered_node_is_dropped() {
        let (fx, _tx) = fixture();
        fx.dispatcher.handle(change("ns=2;i=999", Some("1"))).await;
        assert!(fx.registry.is_empty());
        assert!(fx.sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        use std::time::Duration;

        let (fx, tx) = fixture();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(fx.dispatcher.run(shutdown_rx));

        // Events channel stays open; only the shutdown sender goes away.
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_run_processes_in_arrival_order() {
        let (fx, tx) = fixture();
        fx.registry.add(TagEntry::new("Temp1", "ns=2;i=100")).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sink = fx.sink.clone();
        let handle = tokio::spawn(fx.dispatcher.run(shutdown_rx));

        for v in ["1", "2", "3"] {
            tx.send(change("ns=2;i=100", Some(v))).unwrap();
        }
        drop(tx); // channel close ends the loop

        handle.await.unwrap();
        drop(shutdown_tx);

        let events = sink.events.lock().unwrap();
        let values: Vec<_> = events.iter().map(|e| e.value.clone().unwrap()).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
    }
}
