//! Shared test doubles: a scriptable in-memory transport and a recording
//! event sink.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use zenoh_bridge_opcua::error::{ConnectionError, MonitorError, PublishError};
use zenoh_bridge_opcua::event::TagChangeEvent;
use zenoh_bridge_opcua::publish::EventSink;
use zenoh_bridge_opcua::transport::{
    DataChange, DataChangeSender, ProtocolSession, Transport,
};

/// Observable state of one mock session.
pub struct MockSessionState {
    /// Node ids registered on this session, in registration order.
    pub monitored: Mutex<Vec<String>>,
    /// Sender handed over at connect time; lets tests play the server.
    pub events: Mutex<Option<DataChangeSender>>,
    pub closed: AtomicBool,
}

impl MockSessionState {
    fn new() -> Self {
        Self {
            monitored: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn monitored_nodes(&self) -> Vec<String> {
        self.monitored.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver a value change as the server would.
    pub fn deliver(&self, change: DataChange) {
        let events = self.events.lock().unwrap();
        if let Some(tx) = events.as_ref() {
            let _ = tx.send(change);
        }
    }
}

#[derive(Default)]
struct Script {
    /// Remaining connect attempts to fail before succeeding.
    fail_connects: usize,
    /// Node ids the server rejects with a bad status.
    reject_nodes: HashSet<String>,
    /// Make add-item calls hang (for timeout tests).
    hang_on_add: bool,
}

/// In-memory transport standing in for an OPC UA server.
pub struct MockTransport {
    script: Mutex<Script>,
    sessions: Mutex<Vec<Arc<MockSessionState>>>,
    connect_attempts: AtomicUsize,
    next_item_id: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::default()),
            sessions: Mutex::new(Vec::new()),
            connect_attempts: AtomicUsize::new(0),
            next_item_id: AtomicU32::new(1),
        })
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.script.lock().unwrap().fail_connects = count;
    }

    pub fn reject_node(&self, node_id: &str) {
        self.script
            .lock()
            .unwrap()
            .reject_nodes
            .insert(node_id.to_string());
    }

    pub fn hang_on_add(&self) {
        self.script.lock().unwrap().hang_on_add = true;
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSessionState> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn latest_session(&self) -> Arc<MockSessionState> {
        self.sessions.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        events: DataChangeSender,
    ) -> Result<Box<dyn ProtocolSession>, ConnectionError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        {
            let mut script = self.script.lock().unwrap();
            if script.fail_connects > 0 {
                script.fail_connects -= 1;
                return Err(ConnectionError::Discovery {
                    endpoint: "opc.tcp://mock:4840".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        }

        let state = Arc::new(MockSessionState::new());
        *state.events.lock().unwrap() = Some(events);
        self.sessions.lock().unwrap().push(state.clone());

        let script = {
            let script = self.script.lock().unwrap();
            MockSessionScript {
                reject_nodes: script.reject_nodes.clone(),
                hang_on_add: script.hang_on_add,
            }
        };

        Ok(Box::new(MockSession {
            state,
            script,
            next_item_id: AtomicU32::new(1),
        }))
    }
}

struct MockSessionScript {
    reject_nodes: HashSet<String>,
    hang_on_add: bool,
}

struct MockSession {
    state: Arc<MockSessionState>,
    script: MockSessionScript,
    next_item_id: AtomicU32,
}

#[async_trait]
impl ProtocolSession for MockSession {
    async fn create_subscription(
        &self,
        _publishing_interval: Duration,
    ) -> Result<u32, ConnectionError> {
        Ok(1)
    }

    async fn add_monitored_item(
        &self,
        _subscription_id: u32,
        node_id: &str,
    ) -> Result<u32, MonitorError> {
        // The heartbeat item is exempt so session establishment still
        // completes.
        if self.script.hang_on_add && node_id != zenoh_bridge_opcua::subscription::HEARTBEAT_NODE_ID
        {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.script.reject_nodes.contains(node_id) {
            return Err(MonitorError::Rejected {
                status: "BadNodeIdUnknown".to_string(),
            });
        }
        self.state
            .monitored
            .lock()
            .unwrap()
            .push(node_id.to_string());
        Ok(self.next_item_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that records every published event.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<TagChangeEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<TagChangeEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &TagChangeEvent) -> Result<(), PublishError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
