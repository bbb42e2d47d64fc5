//! Durable per-conversation unread message counters

pub mod config;
pub mod error;
pub mod kv;
pub mod store;

pub use config::UnreadConfig;
pub use error::{Result, StorageError};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use store::{Snapshot, UnreadEntry, UnreadStore};

use std::sync::Arc;

/// Open the store described by `config`
pub fn open(config: &UnreadConfig) -> Arc<UnreadStore> {
    Arc::new(UnreadStore::load(config.backend(), config.storage_key.clone()))
}
