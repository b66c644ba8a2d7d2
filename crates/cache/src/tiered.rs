//! Hot/warm/cold cache hierarchy.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use undertow_core::sync::lock;
use undertow_core::{Payload, WorkCategory, WorkItem};

use crate::config::CacheConfig;
use crate::entry::{scale_ttl, CacheEntry, Tier};
use crate::error::CacheError;
use crate::eviction::{FrequencyTtlPolicy, LruPolicy, TtlPolicy};
use crate::pattern::glob_match;
use crate::prefetch::{PrefetchEngine, PrefetchSink};
use crate::stats::{ratio, CacheStats};
use crate::tier::CacheTier;

/// A value served by the cache and the tier it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: Payload,
    pub tier: Tier,
}

/// Keys removed by one `invalidate` call, grouped by the category they were cached under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidationEvent {
    pub category: WorkCategory,
    pub pattern: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    prefetch_submitted: AtomicU64,
    prefetch_skipped: AtomicU64,
    invalidated: AtomicU64,
    events_dropped: AtomicU64,
}

/// Three independently locked tiers with synchronous promotion.
///
/// `set` writes every tier with its scaled ttl. `get` searches hot, warm,
/// then cold; a hit below hot is copied into every faster tier before
/// returning. No operation holds more than one tier lock at a time.
pub struct TieredCache {
    tiers: [Mutex<CacheTier>; 3],
    config: CacheConfig,
    prefetch: PrefetchEngine,
    sink: Option<Arc<dyn PrefetchSink>>,
    invalidations: mpsc::Sender<InvalidationEvent>,
    counters: Counters,
}

impl TieredCache {
    /// Build the cache and the receiving end of its invalidation events.
    pub fn new(config: &CacheConfig) -> Result<(Self, mpsc::Receiver<InvalidationEvent>), CacheError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.invalidation_capacity);

        let tiers = [
            Mutex::new(CacheTier::new(Tier::Hot, config.hot_capacity, Box::new(LruPolicy))),
            Mutex::new(CacheTier::new(
                Tier::Warm,
                config.warm_capacity,
                Box::new(FrequencyTtlPolicy::default()),
            )),
            Mutex::new(CacheTier::new(Tier::Cold, config.cold_capacity, Box::new(TtlPolicy))),
        ];

        let cache = Self {
            tiers,
            config: config.clone(),
            prefetch: PrefetchEngine::new(config),
            sink: None,
            invalidations: tx,
            counters: Counters::default(),
        };
        Ok((cache, rx))
    }

    /// Route miss-driven prefetch work to `sink`. Without one, misses only
    /// update access patterns.
    pub fn with_prefetch_sink(mut self, sink: Arc<dyn PrefetchSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn tier(&self, tier: Tier) -> &Mutex<CacheTier> {
        &self.tiers[tier.index()]
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn prefetch_engine(&self) -> &PrefetchEngine {
        &self.prefetch
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, key: &str, category: WorkCategory) -> Option<Payload> {
        self.lookup(key, category).map(|hit| hit.value)
    }

    /// Like [`get`](Self::get) but also reports which tier answered.
    pub fn lookup(&self, key: &str, category: WorkCategory) -> Option<CacheHit> {
        let now = Instant::now();
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        self.prefetch.record_access(key, category, now);

        for tier in Tier::ALL {
            let found = lock(self.tier(tier)).get(key, now);
            if let Some(entry) = found {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                if tier != Tier::Hot {
                    self.promote(&entry, now);
                }
                trace!(key, %tier, "cache hit");
                return Some(CacheHit {
                    value: entry.value,
                    tier,
                });
            }
        }

        trace!(key, "cache miss");
        self.schedule_prefetch(key, category);
        None
    }

    /// Copy `entry` into every tier faster than the one it was found in.
    /// Overwrites by key, so repeating a promotion leaves one copy per tier.
    fn promote(&self, entry: &CacheEntry, now: Instant) {
        let source_scale = self.config.ttl_scale(entry.tier);
        for &target in entry.tier.faster() {
            let copy = entry.promoted(target, source_scale, self.config.ttl_scale(target), now);
            lock(self.tier(target)).insert(copy, now);
        }
        debug!(key = %entry.key, from = %entry.tier, "promoted");
    }

    /// Unexpired copy held by one tier, without touching counters or recency.
    pub fn peek_tier(&self, tier: Tier, key: &str) -> Option<CacheEntry> {
        lock(self.tier(tier)).peek(key, Instant::now()).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        Tier::ALL
            .into_iter()
            .any(|tier| lock(self.tier(tier)).peek(key, now).is_some())
    }

    // ── Writes ───────────────────────────────────────────────────────

    pub fn set(&self, key: &str, value: Payload, category: WorkCategory, ttl: Duration) {
        self.set_with_dependencies(key, value, category, ttl, Vec::new());
    }

    /// Write every tier. Dependency keys are recorded on the entries for
    /// invalidation and as correlations for prefetch.
    pub fn set_with_dependencies(
        &self,
        key: &str,
        value: Payload,
        category: WorkCategory,
        ttl: Duration,
        dependencies: Vec<String>,
    ) {
        let now = Instant::now();
        for dep in &dependencies {
            self.prefetch.record_correlation(key, dep);
        }

        let base = CacheEntry::new(key, value, category, Tier::Hot, ttl, now).with_dependencies(dependencies);
        for tier in Tier::ALL {
            let entry = CacheEntry {
                tier,
                ttl: scale_ttl(ttl, self.config.ttl_scale(tier)),
                ..base.clone()
            };
            let evicted = lock(self.tier(tier)).insert(entry, now);
            if evicted > 0 {
                trace!(key, %tier, evicted, "made room");
            }
        }
    }

    // ── Removal ──────────────────────────────────────────────────────

    /// Remove every key matching `pattern` (`*` wildcards) from all tiers,
    /// along with entries that depend on a removed key. Returns the number
    /// of distinct keys removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut removed: BTreeMap<WorkCategory, BTreeSet<String>> = BTreeMap::new();

        for tier in Tier::ALL {
            let mut guard = lock(self.tier(tier));

            let mut doomed: HashSet<String> = guard
                .entries()
                .filter(|e| glob_match(pattern, &e.key) || e.dependencies.iter().any(|d| glob_match(pattern, d)))
                .map(|e| e.key.clone())
                .collect();
            loop {
                let dependents: Vec<String> = guard
                    .entries()
                    .filter(|e| !doomed.contains(&e.key) && e.dependencies.iter().any(|d| doomed.contains(d)))
                    .map(|e| e.key.clone())
                    .collect();
                if dependents.is_empty() {
                    break;
                }
                doomed.extend(dependents);
            }

            for entry in guard.remove_where(|e| doomed.contains(&e.key)) {
                removed.entry(entry.category).or_default().insert(entry.key);
            }
        }

        let mut total = 0;
        for (category, keys) in removed {
            total += keys.len();
            for key in &keys {
                self.prefetch.forget(key);
            }
            let event = InvalidationEvent {
                category,
                pattern: pattern.to_string(),
                keys: keys.into_iter().collect(),
            };
            if self.invalidations.try_send(event).is_err() {
                self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(pattern, %category, "invalidation event dropped");
            }
        }

        self.counters.invalidated.fetch_add(total as u64, Ordering::Relaxed);
        if total > 0 {
            debug!(pattern, removed = total, "invalidated");
        }
        total
    }

    /// Drop expired cold-tier entries. Driven by the background sweeper.
    pub fn sweep_cold(&self) -> usize {
        lock(self.tier(Tier::Cold)).purge_expired(Instant::now())
    }

    pub fn clear(&self) {
        for tier in Tier::ALL {
            lock(self.tier(tier)).clear();
        }
    }

    // ── Prefetch ─────────────────────────────────────────────────────

    fn schedule_prefetch(&self, key: &str, category: WorkCategory) {
        let Some(sink) = &self.sink else {
            return;
        };
        if self.config.prefetch_fanout == 0 {
            return;
        }

        let candidates: Vec<String> = self
            .prefetch
            .candidates(key, self.config.max_correlations)
            .into_iter()
            .filter(|candidate| !self.contains(candidate))
            .take(self.config.prefetch_fanout)
            .collect();

        for candidate in candidates {
            let item_category = self.prefetch.category_of(&candidate).unwrap_or(category);
            let item = WorkItem::new(
                item_category,
                self.config.prefetch_priority,
                Payload::Prefetch {
                    key: candidate.clone(),
                },
            )
            .with_timeout(self.config.prefetch_deadline())
            .with_cache_key(candidate.clone(), self.config.prefetch_ttl());

            if sink.try_prefetch(item) {
                self.counters.prefetch_submitted.fetch_add(1, Ordering::Relaxed);
                trace!(missed = key, candidate, "prefetch submitted");
            } else {
                self.counters.prefetch_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // ── Stats ────────────────────────────────────────────────────────

    pub fn stats(&self) -> CacheStats {
        let tiers = Tier::ALL.iter().map(|&t| lock(self.tier(t)).stats()).collect();
        let lookups = self.counters.lookups.load(Ordering::Relaxed);
        let hits = self.counters.hits.load(Ordering::Relaxed);
        CacheStats {
            tiers,
            lookups,
            hits,
            hit_ratio: ratio(hits, lookups),
            prefetch_submitted: self.counters.prefetch_submitted.load(Ordering::Relaxed),
            prefetch_skipped: self.counters.prefetch_skipped.load(Ordering::Relaxed),
            invalidated: self.counters.invalidated.load(Ordering::Relaxed),
            invalidation_events_dropped: self.counters.events_dropped.load(Ordering::Relaxed),
            tracked_keys: self.prefetch.tracked(),
        }
    }
}
