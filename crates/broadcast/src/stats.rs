use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use undertow_core::{ActivityLevel, WorkCategory};

use crate::subscription::SubscriptionStats;

#[derive(Debug, Default)]
pub(crate) struct BroadcastCounters {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub bypassed: AtomicU64,
    pub buffered: AtomicU64,
    pub flushed: AtomicU64,
    pub dropped_throttled: AtomicU64,
    pub dropped_mailbox: AtomicU64,
    pub dropped_buffer_full: AtomicU64,
    pub dropped_stale: AtomicU64,
    pub discarded: AtomicU64,
}

impl BroadcastCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(
        &self,
        subscriptions: Vec<SubscriptionStats>,
        buffer_depth: usize,
        activity: ActivityLevel,
        rate_multiplier: f64,
        allocations: BTreeMap<WorkCategory, f64>,
    ) -> BroadcastStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BroadcastStats {
            published: get(&self.published),
            delivered: get(&self.delivered),
            bypassed: get(&self.bypassed),
            buffered: get(&self.buffered),
            flushed: get(&self.flushed),
            dropped_throttled: get(&self.dropped_throttled),
            dropped_mailbox: get(&self.dropped_mailbox),
            dropped_buffer_full: get(&self.dropped_buffer_full),
            dropped_stale: get(&self.dropped_stale),
            discarded: get(&self.discarded),
            active_subscribers: subscriptions.len(),
            buffer_depth,
            activity,
            rate_multiplier,
            allocations,
            subscriptions,
        }
    }
}

/// Point-in-time view of the broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastStats {
    pub published: u64,
    /// Mailbox deliveries, one per subscriber reached.
    pub delivered: u64,
    pub bypassed: u64,
    pub buffered: u64,
    pub flushed: u64,
    pub dropped_throttled: u64,
    /// Per-subscriber drops on a full or closed mailbox.
    pub dropped_mailbox: u64,
    pub dropped_buffer_full: u64,
    pub dropped_stale: u64,
    /// Buffered updates thrown away at shutdown.
    pub discarded: u64,
    pub active_subscribers: usize,
    pub buffer_depth: usize,
    pub activity: ActivityLevel,
    pub rate_multiplier: f64,
    /// Current bandwidth budget per category, updates per second.
    pub allocations: BTreeMap<WorkCategory, f64>,
    pub subscriptions: Vec<SubscriptionStats>,
}

impl BroadcastStats {
    /// Every update lost on the way to some subscriber.
    pub fn dropped(&self) -> u64 {
        self.dropped_throttled + self.dropped_mailbox + self.dropped_buffer_full + self.dropped_stale
    }
}
