use crate::error::StorageError;
use crate::kv::{FileStore, KeyValueStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadConfig {
    /// Key the snapshot is stored under
    pub storage_key: String,
    /// Directory for the file backend; `None` keeps counts in memory only
    pub storage_dir: Option<PathBuf>,
}

impl Default for UnreadConfig {
    fn default() -> Self {
        Self {
            storage_key: "chat-unread-storage".to_string(),
            storage_dir: None,
        }
    }
}

impl UnreadConfig {
    pub fn from_env() -> Result<Self, StorageError> {
        dotenvy::dotenv().ok();

        let storage_key = env::var("UNREAD_STORAGE_KEY").unwrap_or_else(|_| Self::default().storage_key);
        if storage_key.trim().is_empty() {
            return Err(StorageError::Config("UNREAD_STORAGE_KEY must not be empty".into()));
        }

        Ok(Self {
            storage_key,
            storage_dir: env::var("UNREAD_STORAGE_DIR")
                .ok()
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        match &self.storage_dir {
            Some(dir) => Arc::new(FileStore::new(dir)),
            None => Arc::new(MemoryStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key() {
        let config = UnreadConfig::default();
        assert_eq!(config.storage_key, "chat-unread-storage");
        assert!(config.storage_dir.is_none());
    }

    #[test]
    fn test_from_env_selects_file_backend() {
        let dir = std::env::temp_dir().join("unread-config-test");
        env::set_var("UNREAD_STORAGE_DIR", &dir);
        let config = UnreadConfig::from_env().unwrap();
        env::remove_var("UNREAD_STORAGE_DIR");

        assert_eq!(config.storage_dir.as_deref(), Some(dir.as_path()));
        let backend = config.backend();
        assert_eq!(backend.get("never-written").unwrap(), None);
    }
}
