use crate::collaborators::{CacheController, IdentityProvider};
use crate::config::SyncConfig;
use crate::helpers::QueryKey;
use crate::mount::{MountHandle, MountSpec, Refresher};
use crate::stats::{StatsCollector, SyncStats};
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use realtime_client::{ChatMessage, RealtimeClient};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use unread_store::UnreadStore;

/// Keeps conversation message queries fresh and counts unread messages
///
/// A message bumps its conversation's unread count unless that conversation
/// is the one on screen or the current user sent it.
pub struct ChatSync {
    client: RealtimeClient,
    cache: Arc<dyn CacheController>,
    identity: Arc<dyn IdentityProvider>,
    unread: Arc<UnreadStore>,
    config: SyncConfig,
    stats: StatsCollector,
    active: Arc<RwLock<Option<String>>>,
}

impl ChatSync {
    pub fn new(
        client: RealtimeClient,
        cache: Arc<dyn CacheController>,
        identity: Arc<dyn IdentityProvider>,
        unread: Arc<UnreadStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            client,
            cache,
            identity,
            unread,
            config,
            stats: StatsCollector::new(),
            active: Arc::new(RwLock::new(None)),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.snapshot()
    }

    pub fn unread(&self) -> &Arc<UnreadStore> {
        &self.unread
    }

    /// Mark `conversation_id` as the one on screen and clear its unread count
    pub fn set_active(&self, conversation_id: impl fmt::Display) {
        let conversation_id = conversation_id.to_string();
        // Visible to dispatch before the count is cleared.
        *self.active.write() = Some(conversation_id.clone());
        self.unread.clear_unread(&conversation_id);
    }

    /// No conversation is on screen any more
    pub fn clear_active(&self) {
        *self.active.write() = None;
    }

    pub fn active(&self) -> Option<String> {
        self.active.read().clone()
    }

    pub fn mount(&self, conversation_id: impl fmt::Display) -> MountHandle {
        let conversation_id = conversation_id.to_string();
        let refresher = Refresher::new(
            self.cache.clone(),
            QueryKey::new(&self.config.messages_query, &conversation_id),
            self.stats.clone(),
        );
        let on_event = refresher.clone();
        let identity = self.identity.clone();
        let unread = self.unread.clone();
        let active = self.active.clone();

        MountHandle::mount(
            self.client.clone(),
            MountSpec {
                refresher,
                poll_interval: None,
                subscribe: Box::new(move |client: &RealtimeClient| {
                    let on_event = on_event.clone();
                    let identity = identity.clone();
                    let unread = unread.clone();
                    let active = active.clone();
                    let conversation_id = conversation_id.clone();
                    client.subscribe_chat(conversation_id.clone(), move |message| {
                        on_event.on_event();

                        let own = identity.current_user_id().as_deref()
                            == Some(message.sender_id.as_str());
                        let on_screen = active.read().as_deref() == Some(conversation_id.as_str());
                        if own || on_screen {
                            debug!(conversation_id = %conversation_id, own, on_screen, "Message not counted as unread");
                            return;
                        }
                        unread.add_unread_message(&conversation_id, message_time(message));
                    })
                }),
            },
        )
    }
}

/// Timestamp of a message, falling back to now when absent or unparseable
fn message_time(message: &ChatMessage) -> DateTime<Utc> {
    let Some(raw) = message.sent_time.as_deref() else {
        return Utc::now();
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|t| t.and_utc()))
        .unwrap_or_else(|_| Utc::now())
}
