//! Counters for synchronization activity

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub events_received: u64,
    pub refetches_requested: u64,
    pub alerts_shown: u64,
    pub alerts_failed: u64,
}

/// Thread-safe statistics collector, shared by every mount of a synchronizer
#[derive(Clone, Default)]
pub struct StatsCollector {
    events_received: Arc<AtomicU64>,
    refetches_requested: Arc<AtomicU64>,
    alerts_shown: Arc<AtomicU64>,
    alerts_failed: Arc<AtomicU64>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refetch(&self) {
        self.refetches_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self, shown: bool) {
        let counter = if shown {
            &self.alerts_shown
        } else {
            &self.alerts_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            refetches_requested: self.refetches_requested.load(Ordering::Relaxed),
            alerts_shown: self.alerts_shown.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.events_received,
            &self.refetches_requested,
            &self.alerts_shown,
            &self.alerts_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
