//! Throttled publish/subscribe fan-out of [`Update`]s.
//!
//! ```text
//! publish ─┬─ priority >= bypass ─────────────────────────────► distribute
//!          ├─ token bucket (rate × activity, capped by bandwidth) ─► distribute
//!          └─ throttled ─┬─ priority >= buffer ──► BatchBuffer ──(flush)──► distribute
//!                        └─ otherwise ──► dropped
//! ```
//!
//! Mailbox delivery is `try_send`; a full mailbox drops the update for that
//! subscriber only. Producers never wait on consumers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, trace};
use undertow_core::sync::lock;
use undertow_core::{ActivityLevel, Update, WorkCategory};

use crate::activity::UserActivityTracker;
use crate::bandwidth::BandwidthManager;
use crate::buffer::BatchBuffer;
use crate::config::BroadcastConfig;
use crate::error::BroadcastError;
use crate::rule::{ThrottleRule, TokenBucket};
use crate::stats::{BroadcastCounters, BroadcastStats};
use crate::subscription::{Delivery, Filter, Subscription, SubscriptionHandle, SubscriptionStats};

/// What happened to a published update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Admitted by the throttle and offered to subscribers.
    Delivered(DistributionReport),
    /// Skipped throttling because of its priority.
    Bypassed(DistributionReport),
    /// Throttled and held for the next flush.
    Buffered,
    /// Throttled and discarded.
    Throttled,
    /// Throttled and the batch buffer was full.
    BufferFull,
}

/// Per-update fan-out counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    /// Subscribers whose filters admitted the update.
    pub matched: usize,
    pub delivered: usize,
    /// Matched subscribers whose mailbox was full or closed.
    pub dropped: usize,
}

/// Summary of one buffer flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub flushed: usize,
    /// Still throttled and put back for the next flush.
    pub held: usize,
    /// Buffered updates older than their ttl, discarded unseen.
    pub stale: usize,
    pub delivered: usize,
    pub dropped: usize,
}

struct CategoryThrottle {
    rule: ThrottleRule,
    bucket: TokenBucket,
}

pub struct ThrottledBroadcaster {
    registry: Mutex<IndexMap<String, Subscription>>,
    throttles: Mutex<HashMap<WorkCategory, CategoryThrottle>>,
    buffer: Mutex<BatchBuffer>,
    activity: UserActivityTracker,
    bandwidth: BandwidthManager,
    config: BroadcastConfig,
    counters: BroadcastCounters,
    closed: AtomicBool,
}

impl ThrottledBroadcaster {
    pub fn new(config: &BroadcastConfig) -> Result<Self, BroadcastError> {
        config.validate()?;
        let now = Instant::now();
        let throttles = config
            .category_rules()?
            .into_iter()
            .map(|(category, rule)| {
                let bucket = TokenBucket::new(rule.burst, now);
                (category, CategoryThrottle { rule, bucket })
            })
            .collect();

        Ok(Self {
            registry: Mutex::new(IndexMap::new()),
            throttles: Mutex::new(throttles),
            buffer: Mutex::new(BatchBuffer::new(config.buffer_capacity)),
            activity: UserActivityTracker::new(config.idle_timeout()),
            bandwidth: BandwidthManager::new(config.total_bandwidth, config.min_share, config.demand_decay),
            config: config.clone(),
            counters: BroadcastCounters::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    pub fn activity(&self) -> &UserActivityTracker {
        &self.activity
    }

    pub fn bandwidth(&self) -> &BandwidthManager {
        &self.bandwidth
    }

    pub fn record_activity(&self, level: ActivityLevel, typing_rate: f64) {
        self.activity.record(level, typing_rate);
    }

    /// Replace a category's rule. The bucket restarts full.
    pub fn set_rule(&self, category: WorkCategory, rule: ThrottleRule) -> Result<(), BroadcastError> {
        rule.validate()?;
        let bucket = TokenBucket::new(rule.burst, Instant::now());
        lock(&self.throttles).insert(category, CategoryThrottle { rule, bucket });
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── Registry ─────────────────────────────────────────────────────

    pub fn subscribe(
        &self,
        id: impl Into<String>,
        filters: Vec<Filter>,
        mailbox_capacity: usize,
    ) -> Result<SubscriptionHandle, BroadcastError> {
        let id = id.into();
        let capacity = self.config.mailbox_capacity(mailbox_capacity);

        let mut registry = lock(&self.registry);
        if self.is_closed() {
            return Err(BroadcastError::ShutDown);
        }
        if registry.contains_key(&id) {
            return Err(BroadcastError::DuplicateSubscription(id));
        }
        let (subscription, receiver) = Subscription::new(id.clone(), filters, capacity);
        registry.insert(id.clone(), subscription);
        info!(subscriber = %id, capacity, "subscribed");
        Ok(SubscriptionHandle::new(id, receiver))
    }

    /// Remove a subscription; its handle sees the end of the stream.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = lock(&self.registry).shift_remove(id).is_some();
        if removed {
            info!(subscriber = id, "unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn subscription_stats(&self, id: &str) -> Option<SubscriptionStats> {
        lock(&self.registry).get(id).map(Subscription::stats)
    }

    // ── Publishing ───────────────────────────────────────────────────

    pub fn publish(&self, update: Update) -> Result<PublishOutcome, BroadcastError> {
        if self.is_closed() {
            return Err(BroadcastError::ShutDown);
        }
        BroadcastCounters::incr(&self.counters.published);
        self.bandwidth.record_demand(update.category);

        if update.priority >= self.config.bypass_priority {
            BroadcastCounters::incr(&self.counters.bypassed);
            return Ok(PublishOutcome::Bypassed(self.distribute(&update)));
        }

        if self.admit(&update, Instant::now()) {
            return Ok(PublishOutcome::Delivered(self.distribute(&update)));
        }

        if update.priority < self.config.buffer_priority {
            BroadcastCounters::incr(&self.counters.dropped_throttled);
            trace!(update = %update.id, category = %update.category, "throttled, dropped");
            return Ok(PublishOutcome::Throttled);
        }

        match lock(&self.buffer).push(update) {
            Ok(()) => {
                BroadcastCounters::incr(&self.counters.buffered);
                Ok(PublishOutcome::Buffered)
            }
            Err(update) => {
                BroadcastCounters::incr(&self.counters.dropped_buffer_full);
                debug!(update = %update.id, "batch buffer full, dropped");
                Ok(PublishOutcome::BufferFull)
            }
        }
    }

    /// Token-bucket check for one update.
    fn admit(&self, update: &Update, now: Instant) -> bool {
        let multiplier = self.activity.multiplier_at(now);
        let cap = self.bandwidth.allocation(update.category);
        let boosted = update.priority >= self.config.boost_priority;

        let mut throttles = lock(&self.throttles);
        let throttle = throttles.entry(update.category).or_insert_with(|| {
            let rule = self.config.default_rule.clone();
            let bucket = TokenBucket::new(rule.burst, now);
            CategoryThrottle { rule, bucket }
        });
        let rate = (throttle.rule.max_rate * multiplier).min(cap);
        let cost = throttle.rule.cost(boosted);
        throttle.bucket.try_take(cost, rate, throttle.rule.burst, now)
    }

    /// Offer `update` to every subscriber whose filters admit it.
    pub fn distribute(&self, update: &Update) -> DistributionReport {
        let mut report = DistributionReport::default();
        let mut closed = Vec::new();
        let mut registry = lock(&self.registry);

        for (id, subscription) in registry.iter_mut() {
            if !subscription.accepts(update) {
                continue;
            }
            report.matched += 1;
            match subscription.offer(update) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => report.dropped += 1,
                Delivery::Closed => {
                    report.dropped += 1;
                    closed.push(id.clone());
                }
            }
        }

        for id in closed {
            registry.shift_remove(&id);
            debug!(subscriber = %id, "receiver dropped, subscription removed");
        }
        drop(registry);

        BroadcastCounters::add(&self.counters.delivered, report.delivered);
        BroadcastCounters::add(&self.counters.dropped_mailbox, report.dropped);
        if report.dropped > 0 {
            trace!(update = %update.id, dropped = report.dropped, "mailbox overflow");
        }
        report
    }

    /// Drain the batch buffer, re-admitting each update through its
    /// category's token bucket.
    ///
    /// Admitted updates are distributed, stale ones discarded, and the rest
    /// go back to the front of the buffer for the next flush.
    pub fn flush(&self) -> FlushReport {
        self.flush_at(Instant::now())
    }

    fn flush_at(&self, now: Instant) -> FlushReport {
        let batch = lock(&self.buffer).flush();
        let mut report = FlushReport::default();
        if batch.is_empty() {
            return report;
        }

        let wall = Utc::now();
        let mut held = Vec::new();
        for update in batch {
            if update.is_stale(wall) {
                report.stale += 1;
                continue;
            }
            if !self.admit(&update, now) {
                held.push(update);
                continue;
            }
            let dist = self.distribute(&update);
            report.flushed += 1;
            report.delivered += dist.delivered;
            report.dropped += dist.dropped;
        }

        if !held.is_empty() {
            report.held = held.len();
            let overflow = lock(&self.buffer).requeue(held);
            if !overflow.is_empty() {
                report.held -= overflow.len();
                BroadcastCounters::add(&self.counters.dropped_buffer_full, overflow.len());
                debug!(dropped = overflow.len(), "batch buffer full on requeue, dropped");
            }
        }

        BroadcastCounters::add(&self.counters.flushed, report.flushed);
        BroadcastCounters::add(&self.counters.dropped_stale, report.stale);
        debug!(
            flushed = report.flushed,
            held = report.held,
            stale = report.stale,
            delivered = report.delivered,
            "batch buffer flushed"
        );
        report
    }

    /// Refuse further publishes, discard the buffer and drop every
    /// subscription so consumers see the end of their streams.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded = lock(&self.buffer).flush().len();
        BroadcastCounters::add(&self.counters.discarded, discarded);
        let subscribers = {
            let mut registry = lock(&self.registry);
            let n = registry.len();
            registry.clear();
            n
        };
        info!(subscribers, discarded, "broadcaster shut down");
    }

    // ── Stats ────────────────────────────────────────────────────────

    pub fn stats(&self) -> BroadcastStats {
        let subscriptions: Vec<SubscriptionStats> =
            lock(&self.registry).values().map(Subscription::stats).collect();
        let allocations: BTreeMap<WorkCategory, f64> = self.bandwidth.allocations().into_iter().collect();
        let level = self.activity.level();

        self.counters.snapshot(
            subscriptions,
            lock(&self.buffer).len(),
            level,
            level.rate_multiplier(),
            allocations,
        )
    }
}
