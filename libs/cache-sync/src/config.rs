use crate::error::SyncError;
use realtime_client::config::millis_var;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Baseline refresh period for the notifications query
    pub poll_interval: Duration,
    /// Query name for a user's notifications (`<name>:<userId>`)
    pub notifications_query: String,
    /// Query name for a conversation's messages (`<name>:<conversationId>`)
    pub messages_query: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            notifications_query: "notifications".to_string(),
            messages_query: "messages".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let poll_interval = millis_var("SYNC_POLL_INTERVAL_MS")
            .map_err(|e| SyncError::Config(e.to_string()))?
            .unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(SyncError::Config("SYNC_POLL_INTERVAL_MS must be positive".into()));
        }

        Ok(Self {
            poll_interval,
            notifications_query: env::var("SYNC_NOTIFICATIONS_QUERY")
                .unwrap_or(defaults.notifications_query),
            messages_query: env::var("SYNC_MESSAGES_QUERY").unwrap_or(defaults.messages_query),
        })
    }
}
