//! Lifetime of one mounted consumer: subscription, poll task, refetch triggers

use crate::collaborators::CacheController;
use crate::helpers::QueryKey;
use crate::stats::StatsCollector;
use parking_lot::Mutex;
use realtime_client::{ConnectionStatus, RealtimeClient, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Issues refresh requests for one query and counts them
#[derive(Clone)]
pub(crate) struct Refresher {
    cache: Arc<dyn CacheController>,
    key: QueryKey,
    stats: StatsCollector,
}

impl Refresher {
    pub(crate) fn new(cache: Arc<dyn CacheController>, key: QueryKey, stats: StatsCollector) -> Self {
        Self { cache, key, stats }
    }

    pub(crate) fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Push path: mark stale, then request exactly one refetch
    pub(crate) fn on_event(&self) {
        self.stats.record_event();
        self.cache.invalidate(&self.key);
        self.refetch("event");
    }

    pub(crate) fn refetch(&self, reason: &'static str) {
        debug!(key = %self.key, reason, "Requesting refetch");
        self.cache.force_refetch(&self.key);
        self.stats.record_refetch();
    }
}

pub(crate) type SubscribeFn = Box<dyn Fn(&RealtimeClient) -> Subscription + Send + Sync>;

pub(crate) struct MountSpec {
    pub(crate) refresher: Refresher,
    pub(crate) poll_interval: Option<Duration>,
    pub(crate) subscribe: SubscribeFn,
}

/// Handle to a mounted synchronizer
///
/// Unmounting (explicitly or by drop) stops polling and removes the realtime
/// callback, including one whose setup is still waiting on `connect()`.
pub struct MountHandle {
    inner: Option<Arc<MountInner>>,
}

struct MountInner {
    client: RealtimeClient,
    refresher: Refresher,
    subscribe: SubscribeFn,
    state: Mutex<MountState>,
}

#[derive(Default)]
struct MountState {
    unmounted: bool,
    subscription: Option<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

impl MountHandle {
    pub(crate) fn mount(client: RealtimeClient, spec: MountSpec) -> Self {
        let inner = Arc::new(MountInner {
            client,
            refresher: spec.refresher,
            subscribe: spec.subscribe,
            state: Mutex::new(MountState::default()),
        });
        info!(key = %inner.refresher.key(), "Mounted cache synchronizer");

        let mut state = inner.state.lock();
        state.tasks.push(tokio::spawn(bind(inner.clone())));
        if let Some(period) = spec.poll_interval {
            state.tasks.push(tokio::spawn(poll(inner.refresher.clone(), period)));
        }
        drop(state);

        Self { inner: Some(inner) }
    }

    /// Handle for a mount that never started (e.g. no signed-in user)
    pub fn inert() -> Self {
        Self { inner: None }
    }

    pub fn is_mounted(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| !inner.state.lock().unmounted)
            .unwrap_or(false)
    }

    /// Whether the realtime callback is currently registered
    pub fn is_subscribed(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| {
                inner
                    .state
                    .lock()
                    .subscription
                    .as_ref()
                    .map(Subscription::is_active)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// The host window regained focus
    pub fn focus_regained(&self) {
        if let Some(inner) = &self.inner {
            if !inner.state.lock().unmounted {
                inner.refresher.refetch("focus");
            }
        }
    }

    pub fn unmount(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        let (subscription, tasks) = {
            let mut state = inner.state.lock();
            if state.unmounted {
                return;
            }
            state.unmounted = true;
            (state.subscription.take(), std::mem::take(&mut state.tasks))
        };

        for task in tasks {
            task.abort();
        }
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        info!(key = %inner.refresher.key(), "Unmounted cache synchronizer");
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl MountInner {
    fn ensure_subscribed(&self) {
        let mut state = self.state.lock();
        if state.unmounted {
            return;
        }
        if state.subscription.as_ref().is_some_and(Subscription::is_active) {
            return;
        }

        let subscription = (self.subscribe)(&self.client);
        if subscription.is_active() {
            debug!(topic = %subscription.topic(), "Synchronizer subscribed");
            state.subscription = Some(subscription);
        } else {
            state.subscription = None;
        }
    }
}

/// Connect if needed, then follow connection generations
///
/// Every `Connected` generation ensures the callback is registered; every one
/// after the first also refetches, since pushes may have been missed while
/// the connection was down.
async fn bind(inner: Arc<MountInner>) {
    let mut states = inner.client.watch_state();

    if !inner.client.is_connected() {
        if let Err(e) = inner.client.connect().await {
            warn!(error = %e, "Realtime connect failed, relying on polling until reconnect");
        }
    }

    let mut seen_generation = None;
    loop {
        let state = *states.borrow_and_update();
        if state.status == ConnectionStatus::Connected && seen_generation != Some(state.generation) {
            if seen_generation.is_some() {
                inner.refresher.refetch("reconnect");
            }
            seen_generation = Some(state.generation);
            inner.ensure_subscribed();
        }

        if states.changed().await.is_err() {
            return;
        }
    }
}

async fn poll(refresher: Refresher, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        refresher.refetch("poll");
    }
}
