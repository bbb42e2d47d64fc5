use crate::collaborators::{CacheController, IdentityProvider, NoAlerts, SystemAlerter};
use crate::config::SyncConfig;
use crate::helpers::QueryKey;
use crate::mount::{MountHandle, MountSpec, Refresher};
use crate::stats::{StatsCollector, SyncStats};
use realtime_client::{Notification, RealtimeClient};
use std::sync::Arc;
use tracing::debug;

/// Keeps a user's notifications query fresh from pushes and polling
///
/// Each inbound notification marks `notifications:<userId>` stale and
/// requests one refetch. Polling every `poll_interval` and refetching on
/// focus or reconnect cover pushes that never arrive.
pub struct NotificationSync {
    client: RealtimeClient,
    cache: Arc<dyn CacheController>,
    identity: Arc<dyn IdentityProvider>,
    alerter: Arc<dyn SystemAlerter>,
    config: SyncConfig,
    stats: StatsCollector,
}

impl NotificationSync {
    pub fn new(
        client: RealtimeClient,
        cache: Arc<dyn CacheController>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            client,
            cache,
            identity,
            alerter: Arc::new(NoAlerts),
            config,
            stats: StatsCollector::new(),
        }
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn SystemAlerter>) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.snapshot()
    }

    /// Start synchronizing for the current user
    ///
    /// Without a signed-in user nothing is started and the handle is inert.
    pub fn mount(&self) -> MountHandle {
        let Some(user_id) = self.identity.current_user_id() else {
            debug!("No current user, notification sync not mounted");
            return MountHandle::inert();
        };

        let refresher = Refresher::new(
            self.cache.clone(),
            QueryKey::new(&self.config.notifications_query, &user_id),
            self.stats.clone(),
        );
        let on_event = refresher.clone();
        let alerter = self.alerter.clone();
        let stats = self.stats.clone();

        MountHandle::mount(
            self.client.clone(),
            MountSpec {
                refresher,
                poll_interval: Some(self.config.poll_interval),
                subscribe: Box::new(move |client: &RealtimeClient| {
                    let on_event = on_event.clone();
                    let alerter = alerter.clone();
                    let stats = stats.clone();
                    client.subscribe_notifications(&user_id, move |notification| {
                        on_event.on_event();
                        alert(alerter.as_ref(), &stats, notification);
                    })
                }),
            },
        )
    }
}

fn alert(alerter: &dyn SystemAlerter, stats: &StatsCollector, notification: &Notification) {
    if !alerter.permission_granted() {
        return;
    }
    match alerter.show("New notification", &notification.title) {
        Ok(()) => stats.record_alert(true),
        Err(e) => {
            debug!(error = %e, notification_id = notification.id, "System alert not shown");
            stats.record_alert(false);
        }
    }
}
