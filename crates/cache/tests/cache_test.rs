use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use undertow_cache::{CacheConfig, PrefetchSink, Tier, TieredCache};
use undertow_core::{Payload, WorkCategory, WorkItem};
use undertow_dispatch::{DispatchConfig, HandlerOutput, HandlerTable, WorkerPool};

/// Records prefetch items and accepts up to `capacity` of them.
struct RecordingSink {
    capacity: usize,
    accepted: Mutex<Vec<WorkItem>>,
}

impl RecordingSink {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            accepted: Mutex::new(Vec::new()),
        })
    }

    fn keys(&self) -> Vec<String> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .map(|item| match &item.payload {
                Payload::Prefetch { key } => key.clone(),
                other => panic!("unexpected payload {other:?}"),
            })
            .collect()
    }
}

impl PrefetchSink for RecordingSink {
    fn try_prefetch(&self, item: WorkItem) -> bool {
        let mut accepted = self.accepted.lock().unwrap();
        if accepted.len() >= self.capacity {
            return false;
        }
        accepted.push(item);
        true
    }
}

#[tokio::test]
async fn ttl_expiry_falls_through_to_warm_and_repromotes() {
    let (cache, _rx) = TieredCache::new(&CacheConfig::default()).unwrap();

    cache.set("x", Payload::Number(42), WorkCategory::Analysis, Duration::from_millis(100));
    let hit = cache.lookup("x", WorkCategory::Analysis).unwrap();
    assert_eq!(hit.value, Payload::Number(42));
    assert_eq!(hit.tier, Tier::Hot);
    assert_eq!(cache.stats().tier(Tier::Hot).unwrap().hits, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(cache.peek_tier(Tier::Hot, "x").is_none());
    let warm = cache.peek_tier(Tier::Warm, "x").unwrap();
    assert_eq!(warm.ttl, Duration::from_millis(200));

    let hit = cache.lookup("x", WorkCategory::Analysis).unwrap();
    assert_eq!(hit.value, Payload::Number(42));
    assert_eq!(hit.tier, Tier::Warm);

    let hot = cache.peek_tier(Tier::Hot, "x").unwrap();
    assert_eq!(hot.ttl, Duration::from_millis(100));
    let again = cache.lookup("x", WorkCategory::Analysis).unwrap();
    assert_eq!(again.tier, Tier::Hot);
}

#[test]
fn hot_tier_overflow_evicts_lru_tail_only_from_hot() {
    let config = CacheConfig {
        hot_capacity: 2,
        ..CacheConfig::default()
    };
    let (cache, _rx) = TieredCache::new(&config).unwrap();
    let ttl = Duration::from_secs(30);
    cache.set("a", Payload::Number(1), WorkCategory::Analysis, ttl);
    cache.set("b", Payload::Number(2), WorkCategory::Analysis, ttl);
    assert!(cache.get("a", WorkCategory::Analysis).is_some());
    cache.set("c", Payload::Number(3), WorkCategory::Analysis, ttl);

    assert!(cache.peek_tier(Tier::Hot, "b").is_none());
    assert!(cache.peek_tier(Tier::Hot, "a").is_some());
    // Slower tiers keep their copies.
    assert!(cache.peek_tier(Tier::Warm, "b").is_some());
    assert_eq!(cache.stats().tier(Tier::Hot).unwrap().evictions, 1);
}

#[test]
fn miss_prefetches_correlated_keys_up_to_fanout() {
    let config = CacheConfig {
        prefetch_fanout: 3,
        ..CacheConfig::default()
    };
    let sink = RecordingSink::new(2);
    let (cache, _rx) = TieredCache::new(&config).unwrap();
    let cache = cache.with_prefetch_sink(sink.clone());

    let engine = cache.prefetch_engine();
    for dep in ["d1", "d2", "d3", "d4", "d5"] {
        engine.record_correlation("root", dep);
    }
    cache.set("d5", Payload::Empty, WorkCategory::Validation, Duration::from_secs(30));

    assert!(cache.get("root", WorkCategory::Validation).is_none());

    // d5 is already cached; of the next three, the sink takes two and skips one.
    assert_eq!(sink.keys(), vec!["d4".to_string(), "d3".to_string()]);
    let stats = cache.stats();
    assert_eq!(stats.prefetch_submitted, 2);
    assert_eq!(stats.prefetch_skipped, 1);

    let item = &sink.accepted.lock().unwrap()[0];
    assert_eq!(item.priority, config.prefetch_priority);
    assert!(item.deadline.is_some());
    assert_eq!(item.cache_key.as_deref(), Some("d4"));
}

#[tokio::test]
async fn prefetch_into_full_worker_pool_is_skipped() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let gate = Arc::new(tokio::sync::Notify::new());
    let wait = gate.clone();
    let handlers = HandlerTable::new().register_fn(WorkCategory::Analysis, move |p| {
        let wait = wait.clone();
        async move {
            wait.notified().await;
            Ok(HandlerOutput::from(p))
        }
    });
    let dispatch = DispatchConfig {
        workers: 1,
        dispatch_capacity: 1,
        admission_tick_ms: 60_000,
        ..DispatchConfig::default()
    };
    let (pool, _results) = WorkerPool::start(&dispatch, handlers, shutdown_rx).unwrap();

    let (cache, _rx) = TieredCache::new(&CacheConfig::default()).unwrap();
    let cache = cache.with_prefetch_sink(Arc::new(pool.clone()));
    for dep in ["a", "b", "c", "d", "e"] {
        cache.prefetch_engine().record_correlation("root", dep);
    }

    assert!(cache.get("root", WorkCategory::Analysis).is_none());

    let stats = cache.stats();
    assert_eq!(stats.prefetch_submitted + stats.prefetch_skipped, 3);
    assert!(stats.prefetch_skipped >= 1);
    // Skipped prefetches are never queued for later.
    assert_eq!(pool.queue_depth(), 0);
    assert_eq!(pool.stats().prefetch_accepted, stats.prefetch_submitted);
    gate.notify_waiters();
}
