//! Tag registry: the local cache of monitored points.
//!
//! The registry is the single source of truth for "what should be
//! monitored". It survives session renewals; the watchdog replays its
//! snapshot onto every new subscription. All mutation is synchronous and
//! safe under concurrent access from the notification dispatcher, the
//! replay path, and external readers: the map structure is guarded by an
//! `RwLock` while entries sit behind per-entry mutexes, so updates to one
//! tag never block updates to another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::AddTagError;

/// Latest known state of one monitored point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Unique key within the registry.
    pub display_name: String,

    /// Namespace-qualified server node id; immutable after creation.
    pub node_id: String,

    /// String-encoded value; `None` when the last read was invalid.
    pub current_value: Option<String>,

    /// Last non-null value, retained even when `current_value` goes null.
    pub last_good_value: Option<String>,

    /// Last reported quality/status code.
    pub status_code: String,

    /// Local-clock timestamp of the last update.
    pub last_updated_time: Option<DateTime<Local>>,

    /// Server-clock timestamp of the last update, converted to local time.
    pub last_source_timestamp: Option<DateTime<Local>>,
}

impl TagEntry {
    /// Create a fresh entry with no recorded value.
    pub fn new(display_name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            node_id: node_id.into(),
            current_value: None,
            last_good_value: None,
            status_code: String::new(),
            last_updated_time: None,
            last_source_timestamp: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Arc<Mutex<TagEntry>>>,
    // node id -> display name, enforces node uniqueness across entries
    by_node: HashMap<String, String>,
}

/// Concurrent map of display name to [`TagEntry`].
#[derive(Debug, Default)]
pub struct TagRegistry {
    inner: RwLock<Inner>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Fails when the node id is already monitored under
    /// any display name, or when the display name is taken.
    pub fn add(&self, tag: TagEntry) -> Result<(), AddTagError> {
        let mut inner = self.inner.write().expect("tag registry lock poisoned");

        if let Some(existing) = inner.by_node.get(&tag.node_id) {
            return Err(AddTagError::DuplicateNode {
                node_id: tag.node_id.clone(),
                display_name: existing.clone(),
            });
        }
        if inner.entries.contains_key(&tag.display_name) {
            return Err(AddTagError::DuplicateName {
                display_name: tag.display_name.clone(),
            });
        }

        inner
            .by_node
            .insert(tag.node_id.clone(), tag.display_name.clone());
        inner
            .entries
            .insert(tag.display_name.clone(), Arc::new(Mutex::new(tag)));
        Ok(())
    }

    /// Look up a tag by display name, returning a point-in-time copy.
    pub fn get(&self, display_name: &str) -> Option<TagEntry> {
        let inner = self.inner.read().expect("tag registry lock poisoned");
        inner
            .entries
            .get(display_name)
            .map(|e| e.lock().expect("tag entry lock poisoned").clone())
    }

    /// Resolve the display name registered for a node id.
    pub fn display_name_for(&self, node_id: &str) -> Option<String> {
        let inner = self.inner.read().expect("tag registry lock poisoned");
        inner.by_node.get(node_id).cloned()
    }

    /// Whether a node id is registered under any display name.
    pub fn contains_node(&self, node_id: &str) -> bool {
        let inner = self.inner.read().expect("tag registry lock poisoned");
        inner.by_node.contains_key(node_id)
    }

    /// Record a delivered value for a tag. Returns `false` when the tag is
    /// not registered.
    pub fn record_value(
        &self,
        display_name: &str,
        value: &str,
        status_code: &str,
        source_timestamp: Option<DateTime<Local>>,
    ) -> bool {
        let inner = self.inner.read().expect("tag registry lock poisoned");
        let Some(entry) = inner.entries.get(display_name) else {
            return false;
        };
        let mut entry = entry.lock().expect("tag entry lock poisoned");
        entry.current_value = Some(value.to_string());
        entry.last_good_value = Some(value.to_string());
        entry.status_code = status_code.to_string();
        entry.last_updated_time = Some(Local::now());
        entry.last_source_timestamp = source_timestamp;
        true
    }

    /// Record an absent (null/invalid) delivery for a tag. The last good
    /// value is left untouched; both timestamps describe this delivery.
    /// Returns `false` when the tag is not registered.
    pub fn record_absent(
        &self,
        display_name: &str,
        status_code: &str,
        source_timestamp: Option<DateTime<Local>>,
    ) -> bool {
        let inner = self.inner.read().expect("tag registry lock poisoned");
        let Some(entry) = inner.entries.get(display_name) else {
            return false;
        };
        let mut entry = entry.lock().expect("tag entry lock poisoned");
        entry.current_value = None;
        entry.status_code = status_code.to_string();
        entry.last_updated_time = Some(Local::now());
        entry.last_source_timestamp = source_timestamp;
        true
    }

    /// Point-in-time copy of every entry, used by the watchdog to replay
    /// registrations onto a fresh subscription.
    pub fn snapshot(&self) -> Vec<TagEntry> {
        let inner = self.inner.read().expect("tag registry lock poisoned");
        let mut tags: Vec<TagEntry> = inner
            .entries
            .values()
            .map(|e| e.lock().expect("tag entry lock poisoned").clone())
            .collect();
        tags.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        tags
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("tag registry lock poisoned");
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
