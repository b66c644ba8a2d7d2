//! The pipeline owner and the loops it runs.
//!
//! ```text
//! submit ──► WorkerPool ──results──► result router ──┬─► TieredCache::set
//!               ▲                                    └─► ThrottledBroadcaster::publish
//!               │ prefetch                                      ▲
//! get ──► TieredCache ──invalidations──► invalidation router ────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use undertow_broadcast::{
    spawn_flush_loop, spawn_recalculation_loop, BroadcastError, Filter, PublishOutcome, SubscriptionHandle,
    ThrottledBroadcaster,
};
use undertow_cache::{spawn_cold_sweeper, InvalidationEvent, TieredCache};
use undertow_core::sync::{lock, shutdown_requested};
use undertow_core::{ActivityLevel, Payload, Update, WorkCategory, WorkItem, WorkResult};
use undertow_dispatch::{HandlerTable, WorkerPool};

use crate::config::{PipelineConfig, PipelineSettings};
use crate::error::PipelineError;
use crate::metrics::{History, PipelineStats, RouterStats, StatsPoint};

#[derive(Debug, Default)]
struct RouterCounters {
    results_routed: AtomicU64,
    results_cached: AtomicU64,
    invalidations_routed: AtomicU64,
    publish_rejected: AtomicU64,
}

impl RouterCounters {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RouterStats {
        RouterStats {
            results_routed: self.results_routed.load(Ordering::Relaxed),
            results_cached: self.results_cached.load(Ordering::Relaxed),
            invalidations_routed: self.invalidations_routed.load(Ordering::Relaxed),
            publish_rejected: self.publish_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Components shared between the owner and its background loops.
struct Shared {
    pool: WorkerPool,
    cache: Arc<TieredCache>,
    broadcaster: Arc<ThrottledBroadcaster>,
    counters: RouterCounters,
    history: Mutex<History<StatsPoint>>,
    settings: PipelineSettings,
    started: Instant,
}

impl Shared {
    fn stats(&self) -> PipelineStats {
        PipelineStats {
            uptime_secs: self.started.elapsed().as_secs_f64(),
            pool: self.pool.stats(),
            cache: self.cache.stats(),
            broadcast: self.broadcaster.stats(),
            routing: self.counters.snapshot(),
        }
    }

    fn publish(&self, update: Update) {
        match self.broadcaster.publish(update) {
            Ok(PublishOutcome::Throttled) | Ok(PublishOutcome::BufferFull) => {
                debug!("update dropped by throttle");
            }
            Ok(_) => {}
            Err(BroadcastError::ShutDown) => {
                RouterCounters::incr(&self.counters.publish_rejected);
            }
            Err(e) => warn!(error = %e, "publish failed"),
        }
    }

    /// Cache a successful result under its key, then announce it.
    fn route_result(&self, result: WorkResult) {
        RouterCounters::incr(&self.counters.results_routed);
        if result.success {
            if let (Some(key), Some(payload)) = (&result.cache_key, &result.payload) {
                let ttl = result.cache_ttl.unwrap_or_else(|| self.settings.result_cache_ttl());
                self.cache.set(key, payload.clone(), result.category, ttl);
                RouterCounters::incr(&self.counters.results_cached);
            }
        }
        self.publish(Update::from_result(&result, self.settings.update_ttl()));
    }

    fn route_invalidation(&self, event: InvalidationEvent) {
        RouterCounters::incr(&self.counters.invalidations_routed);
        debug!(
            category = %event.category,
            pattern = %event.pattern,
            keys = event.keys.len(),
            "routing invalidation"
        );
        let update = Update::invalidation(event.category, self.settings.invalidation_priority, event.keys)
            .with_ttl(self.settings.update_ttl());
        self.publish(update);
    }
}

/// A running dispatch/cache/broadcast pipeline.
///
/// All background loops share one shutdown signal owned here; see
/// [`Pipeline::shutdown`].
pub struct Pipeline {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate `config`, build every component and spawn the loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: PipelineConfig, handlers: HandlerTable) -> Result<Self, PipelineError> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (pool, results) = WorkerPool::start(&config.dispatch, handlers, shutdown_rx.clone())?;
        let (cache, invalidations) = TieredCache::new(&config.cache)?;
        let cache = Arc::new(cache.with_prefetch_sink(Arc::new(pool.clone())));
        let broadcaster = Arc::new(ThrottledBroadcaster::new(&config.broadcast)?);

        let shared = Arc::new(Shared {
            pool,
            cache: cache.clone(),
            broadcaster: broadcaster.clone(),
            counters: RouterCounters::default(),
            history: Mutex::new(History::new(config.pipeline.history_capacity)),
            settings: config.pipeline.clone(),
            started: Instant::now(),
        });

        let tasks = vec![
            spawn_cold_sweeper(cache, config.cache.sweep_interval(), shutdown_rx.clone()),
            spawn_flush_loop(broadcaster.clone(), config.broadcast.flush_interval(), shutdown_rx.clone()),
            spawn_recalculation_loop(broadcaster, config.broadcast.recalc_interval(), shutdown_rx.clone()),
            spawn_result_router(shared.clone(), results),
            spawn_invalidation_router(shared.clone(), invalidations, shutdown_rx.clone()),
            spawn_stats_loop(shared.clone(), config.pipeline.stats_interval(), shutdown_rx),
        ];

        info!(
            workers = config.dispatch.workers,
            hot_capacity = config.cache.hot_capacity,
            flush_interval_ms = config.broadcast.flush_interval_ms,
            "pipeline started"
        );

        Ok(Self {
            shared,
            shutdown: shutdown_tx,
            tasks: Mutex::new(tasks),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    pub fn cache(&self) -> &TieredCache {
        &self.shared.cache
    }

    pub fn broadcaster(&self) -> &ThrottledBroadcaster {
        &self.shared.broadcaster
    }

    // ── Work ─────────────────────────────────────────────────────────

    pub fn submit(&self, item: WorkItem) -> Result<(), PipelineError> {
        Ok(self.shared.pool.submit(item)?)
    }

    pub fn submit_high_priority(&self, item: WorkItem) -> Result<(), PipelineError> {
        Ok(self.shared.pool.submit_high_priority(item)?)
    }

    // ── Subscribers ──────────────────────────────────────────────────

    pub fn subscribe(
        &self,
        id: impl Into<String>,
        filters: Vec<Filter>,
        mailbox_capacity: usize,
    ) -> Result<SubscriptionHandle, PipelineError> {
        Ok(self.shared.broadcaster.subscribe(id, filters, mailbox_capacity)?)
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        self.shared.broadcaster.unsubscribe(id)
    }

    /// Publish an update produced outside the worker pool.
    pub fn publish(&self, update: Update) -> Result<PublishOutcome, PipelineError> {
        Ok(self.shared.broadcaster.publish(update)?)
    }

    pub fn record_activity(&self, level: ActivityLevel, typing_rate: f64) {
        self.shared.broadcaster.record_activity(level, typing_rate);
    }

    // ── Cache ────────────────────────────────────────────────────────

    pub fn get(&self, key: &str, category: WorkCategory) -> Option<Payload> {
        self.shared.cache.get(key, category)
    }

    pub fn set(&self, key: &str, value: Payload, category: WorkCategory, ttl: Duration) {
        self.shared.cache.set(key, value, category, ttl);
    }

    /// Remove every key matching the glob `pattern` from all tiers.
    /// Subscribers hear about it through an invalidation update.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.shared.cache.invalidate(pattern)
    }

    // ── Stats ────────────────────────────────────────────────────────

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    /// Periodic snapshots, oldest first.
    pub fn history(&self) -> Vec<StatsPoint> {
        lock(&self.shared.history).to_vec()
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Signal every loop to stop and wait for them.
    ///
    /// Workers finish the item they hold; queued work is discarded with a
    /// failed result for its callback. Results still in flight are routed
    /// before the broadcaster closes, then subscribers see the end of their
    /// streams. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.shared.pool.join().await;

        let handles: Vec<_> = lock(&self.tasks).drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "pipeline task ended abnormally");
            }
        }

        self.shared.broadcaster.shutdown();
        let stats = self.shared.stats();
        info!(
            submitted = stats.pool.submitted,
            completed = stats.pool.completed,
            failed = stats.pool.failed,
            discarded = stats.pool.discarded,
            delivered = stats.broadcast.delivered,
            "pipeline stopped"
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

// ── Background loops ─────────────────────────────────────────────────

/// Drain worker results until the pool's result channel closes.
fn spawn_result_router(shared: Arc<Shared>, mut results: mpsc::UnboundedReceiver<WorkResult>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            shared.route_result(result);
        }
        debug!("result router stopped");
    })
}

fn spawn_invalidation_router(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<InvalidationEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => shared.route_invalidation(event),
                    None => break,
                },
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        while let Ok(event) = events.try_recv() {
            shared.route_invalidation(event);
        }
        debug!("invalidation router stopped");
    })
}

fn spawn_stats_loop(shared: Arc<Shared>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = shared.stats();
                    let point = StatsPoint::from(&stats);
                    debug!(
                        queue_depth = point.queue_depth,
                        in_flight = point.in_flight,
                        hit_ratio = point.cache_hit_ratio,
                        dropped = point.updates_dropped,
                        "stats snapshot"
                    );
                    lock(&shared.history).record(point);
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
    })
}
