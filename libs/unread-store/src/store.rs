use crate::kv::KeyValueStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadEntry {
    pub conversation_id: String,
    pub count: u32,
    pub last_message_time: DateTime<Utc>,
}

/// Persisted form: `[conversationId, entry]` pairs ordered by conversation id
pub type Snapshot = Vec<(String, UnreadEntry)>;

/// Per-conversation unread counters, written through to a [`KeyValueStore`]
///
/// Counts only grow through [`add_unread_message`](Self::add_unread_message)
/// and only reset through [`clear_unread`](Self::clear_unread). Storage
/// failures are logged and never fail a mutation.
pub struct UnreadStore {
    entries: Mutex<BTreeMap<String, UnreadEntry>>,
    backend: Arc<dyn KeyValueStore>,
    storage_key: String,
}

impl UnreadStore {
    /// Hydrate from `backend`; absent or malformed data yields an empty store
    pub fn load(backend: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let entries = match backend.get(&storage_key) {
            Ok(Some(raw)) => match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snapshot) => Self::from_snapshot(snapshot),
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "Discarding malformed unread snapshot");
                    BTreeMap::new()
                }
            },
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Failed to read unread snapshot");
                BTreeMap::new()
            }
        };
        debug!(key = %storage_key, conversations = entries.len(), "Unread store hydrated");

        Self {
            entries: Mutex::new(entries),
            backend,
            storage_key,
        }
    }

    pub fn add_unread_message(&self, conversation_id: impl fmt::Display, message_time: DateTime<Utc>) {
        let conversation_id = conversation_id.to_string();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(conversation_id.clone())
            .or_insert_with(|| UnreadEntry {
                conversation_id,
                count: 0,
                last_message_time: message_time,
            });
        entry.count = entry.count.saturating_add(1);
        entry.last_message_time = message_time;
        self.persist(&entries);
    }

    pub fn clear_unread(&self, conversation_id: impl fmt::Display) {
        let mut entries = self.entries.lock();
        if entries.remove(&conversation_id.to_string()).is_some() {
            self.persist(&entries);
        }
    }

    pub fn get_unread_count(&self, conversation_id: impl fmt::Display) -> u32 {
        self.entries
            .lock()
            .get(&conversation_id.to_string())
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn get_total_unread(&self) -> u64 {
        self.entries
            .lock()
            .values()
            .map(|entry| u64::from(entry.count))
            .sum()
    }

    /// All entries, ordered by conversation id
    pub fn entries(&self) -> Vec<UnreadEntry> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Self::snapshot_of(&self.entries.lock())
    }

    /// Rebuild the map from a snapshot; later duplicates win
    pub fn from_snapshot(snapshot: Snapshot) -> BTreeMap<String, UnreadEntry> {
        snapshot.into_iter().collect()
    }

    fn snapshot_of(entries: &BTreeMap<String, UnreadEntry>) -> Snapshot {
        entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    // Runs under the entries lock so writes land in mutation order.
    fn persist(&self, entries: &BTreeMap<String, UnreadEntry>) {
        let result = serde_json::to_string(&Self::snapshot_of(entries))
            .map_err(Into::into)
            .and_then(|json| self.backend.set(&self.storage_key, &json));
        if let Err(e) = result {
            warn!(key = %self.storage_key, error = %e, "Failed to persist unread counts");
        }
    }
}

impl fmt::Debug for UnreadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnreadStore")
            .field("storage_key", &self.storage_key)
            .field("conversations", &self.entries.lock().len())
            .finish()
    }
}
