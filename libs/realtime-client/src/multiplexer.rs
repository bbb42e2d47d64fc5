use crate::events::InboundEvent;
use crate::frame::Frame;
use crate::session::{Session, SessionObserver};
use crate::topic::Topic;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Consumer callback invoked for every event on a topic
pub type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Identifies one registered callback within a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct TopicEntry {
    subscription_id: String,
    /// Connection generation the SUBSCRIBE frame was last sent on
    generation: u64,
    callbacks: Vec<(CallbackId, Callback)>,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<Topic, TopicEntry>,
    // subscription id -> topic, for routing MESSAGE frames
    by_subscription: HashMap<String, Topic>,
}

/// Fans a single physical subscription per topic out to many consumers
///
/// The first callback on a topic sends SUBSCRIBE, the last one to leave sends
/// UNSUBSCRIBE. Callbacks run outside the registry lock and a panicking
/// callback never reaches its siblings.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    session: Session,
    registry: Mutex<Registry>,
    next_callback: AtomicU64,
    next_subscription: AtomicU64,
}

impl Multiplexer {
    pub fn new(session: Session) -> Self {
        let inner = Arc::new(MuxInner {
            session,
            registry: Mutex::new(Registry::default()),
            next_callback: AtomicU64::new(0),
            next_subscription: AtomicU64::new(0),
        });
        let observer: Weak<MuxInner> = Arc::downgrade(&inner);
        inner.session.add_observer(observer);

        Self { inner }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Register `callback` on `topic`
    ///
    /// Without a live connection this logs a warning and returns an inert
    /// handle: nothing is queued and nothing will be delivered.
    pub fn subscribe(&self, topic: Topic, callback: Callback) -> Subscription {
        if !self.inner.session.is_connected() {
            warn!(topic = %topic, "Realtime not connected, subscription skipped");
            return Subscription::inert(topic);
        }

        let callback_id = CallbackId(self.inner.next_callback.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.inner.registry.lock();

        if let Some(entry) = registry.topics.get_mut(&topic) {
            entry.callbacks.push((callback_id, callback));
            debug!(
                topic = %topic,
                callbacks = entry.callbacks.len(),
                "Added callback to existing subscription"
            );
        } else {
            let subscription_id = format!(
                "sub-{}",
                self.inner.next_subscription.fetch_add(1, Ordering::Relaxed)
            );
            let generation = match self.inner.send_subscribe(&topic, &subscription_id) {
                Ok(generation) => generation,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Failed to subscribe");
                    return Subscription::inert(topic);
                }
            };
            debug!(topic = %topic, subscription_id = %subscription_id, "Opened physical subscription");

            registry
                .by_subscription
                .insert(subscription_id.clone(), topic.clone());
            registry.topics.insert(
                topic.clone(),
                TopicEntry {
                    subscription_id,
                    generation,
                    callbacks: vec![(callback_id, callback)],
                },
            );
        }
        drop(registry);

        Subscription {
            mux: Arc::downgrade(&self.inner),
            topic,
            callback_id: Some(callback_id),
            active: AtomicBool::new(true),
        }
    }

    /// Drop every registration, unsubscribing each topic once
    pub fn clear(&self) {
        let drained: Vec<(Topic, TopicEntry)> = {
            let mut registry = self.inner.registry.lock();
            registry.by_subscription.clear();
            registry.topics.drain().collect()
        };
        if drained.is_empty() {
            return;
        }

        for (topic, entry) in &drained {
            if self
                .inner
                .session
                .send_frame(&Frame::unsubscribe(&entry.subscription_id))
                .is_err()
            {
                debug!(topic = %topic, "Connection gone, skipping UNSUBSCRIBE");
            }
        }
        info!(topics = drained.len(), "Cleared all topic registrations");
    }

    /// Topics with at least one live callback
    pub fn active_topics(&self) -> Vec<Topic> {
        self.inner.registry.lock().topics.keys().cloned().collect()
    }

    pub fn callback_count(&self, topic: &Topic) -> usize {
        self.inner
            .registry
            .lock()
            .topics
            .get(topic)
            .map(|entry| entry.callbacks.len())
            .unwrap_or(0)
    }

    /// Whether a physical subscription exists for `topic`
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.inner.registry.lock().topics.contains_key(topic)
    }
}

impl MuxInner {
    fn send_subscribe(&self, topic: &Topic, subscription_id: &str) -> crate::Result<u64> {
        let destination = self.session.config().destination(&topic.to_string());
        self.session
            .transmit(&Frame::subscribe(subscription_id, &destination))
    }

    fn remove_callback(&self, topic: &Topic, callback_id: CallbackId) {
        let mut registry = self.registry.lock();

        let now_empty = match registry.topics.get_mut(topic) {
            Some(entry) => {
                let before = entry.callbacks.len();
                entry.callbacks.retain(|(id, _)| *id != callback_id);
                if entry.callbacks.len() == before {
                    return;
                }
                debug!(
                    topic = %topic,
                    remaining = entry.callbacks.len(),
                    "Removed callback"
                );
                entry.callbacks.is_empty()
            }
            None => return,
        };

        if now_empty {
            if let Some(entry) = registry.topics.remove(topic) {
                registry.by_subscription.remove(&entry.subscription_id);
                if self
                    .session
                    .send_frame(&Frame::unsubscribe(&entry.subscription_id))
                    .is_err()
                {
                    debug!(topic = %topic, "Connection gone, skipping UNSUBSCRIBE");
                }
                debug!(topic = %topic, subscription_id = %entry.subscription_id, "Closed physical subscription");
            }
        }
    }

    fn is_registered(&self, topic: &Topic, callback_id: CallbackId) -> bool {
        self.registry
            .lock()
            .topics
            .get(topic)
            .map(|entry| entry.callbacks.iter().any(|(id, _)| *id == callback_id))
            .unwrap_or(false)
    }
}

impl SessionObserver for MuxInner {
    /// Re-establish every live topic on a fresh connection
    fn on_connected(&self, generation: u64) {
        let mut registry = self.registry.lock();
        let stale: Vec<Topic> = registry
            .topics
            .iter()
            .filter(|(_, entry)| entry.generation < generation)
            .map(|(topic, _)| topic.clone())
            .collect();
        if stale.is_empty() {
            return;
        }

        info!(generation, topics = stale.len(), "Restoring subscriptions");
        for topic in stale {
            let Some(entry) = registry.topics.get_mut(&topic) else {
                continue;
            };
            match self.send_subscribe(&topic, &entry.subscription_id) {
                Ok(sent_on) => entry.generation = sent_on,
                Err(e) => warn!(topic = %topic, error = %e, "Failed to restore subscription"),
            }
        }
    }

    fn on_message(&self, frame: &Frame) {
        let Some(subscription_id) = frame.header("subscription") else {
            warn!("Dropping MESSAGE without subscription header");
            return;
        };

        let (topic, callbacks) = {
            let registry = self.registry.lock();
            let Some(topic) = registry.by_subscription.get(subscription_id) else {
                debug!(subscription_id, "Dropping MESSAGE for unknown subscription");
                return;
            };
            let Some(entry) = registry.topics.get(topic) else {
                return;
            };
            let callbacks: Vec<Callback> = entry.callbacks.iter().map(|(_, cb)| cb.clone()).collect();
            (topic.clone(), callbacks)
        };

        let event = match topic.parse_event(&frame.body) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(topic = %topic, "Event filtered out");
                return;
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping malformed frame");
                return;
            }
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(topic = %topic, event = event.kind(), "Subscriber callback panicked");
            }
        }
    }
}

/// Handle to one callback registration
///
/// Dropping the handle unsubscribes it. `unsubscribe` may be called any number
/// of times.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    mux: Weak<MuxInner>,
    topic: Topic,
    callback_id: Option<CallbackId>,
    active: AtomicBool,
}

impl Subscription {
    fn inert(topic: Topic) -> Self {
        Self {
            mux: Weak::new(),
            topic,
            callback_id: None,
            active: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Whether this handle's callback is still registered
    pub fn is_active(&self) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        match (self.mux.upgrade(), self.callback_id) {
            (Some(mux), Some(id)) => mux.is_registered(&self.topic, id),
            _ => false,
        }
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let (Some(mux), Some(id)) = (self.mux.upgrade(), self.callback_id) {
            mux.remove_callback(&self.topic, id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("callback_id", &self.callback_id)
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}
