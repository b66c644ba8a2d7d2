//! Fixed-size worker pool fed by a periodic admission loop.
//!
//! ```text
//! submit ──► PriorityQueue ──(tick: deadline, throttle)──► dispatch buffer ──► N workers ──► results
//!                 ▲                        │ full / throttled                      │
//!                 └────────────────────────┘                                   callback
//! ```
//!
//! Every handoff is non-blocking. Results go out on an unbounded channel so a
//! worker never waits on the router and no result is lost. The queue and the
//! dispatch sender live behind one lock so that shutdown can close admission
//! and drain the queue without a late submission slipping past it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use undertow_core::sync::{lock, shutdown_requested};
use undertow_core::{WorkItem, WorkResult, MAX_PRIORITY};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::handler::HandlerTable;
use crate::queue::PriorityQueue;
use crate::stats::{PoolCounters, PoolStats};
use crate::throttle::RateThrottle;

// ── Shared state ─────────────────────────────────────────────────────

struct Admission {
    queue: PriorityQueue,
    /// `None` once shutdown closed admission.
    dispatch: Option<mpsc::Sender<WorkItem>>,
}

struct PoolInner {
    admission: Mutex<Admission>,
    throttle: RateThrottle,
    backoff: Duration,
    counters: PoolCounters,
}

impl PoolInner {
    /// Move ready items into the dispatch buffer in priority order.
    ///
    /// Returns the number of items handed to the workers during this tick.
    fn admit_ready(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        let mut deferred = Vec::new();
        let mut admitted = 0;

        {
            let mut guard = lock(&self.admission);
            let Admission { queue, dispatch } = &mut *guard;
            let Some(tx) = dispatch.as_ref() else {
                return 0;
            };

            while let Some(mut item) = queue.pop_ready(now) {
                if item.is_expired(now) {
                    expired.push(item);
                    continue;
                }
                if self.throttle.should_throttle_at(item.category, now) {
                    PoolCounters::incr(&self.counters.throttled);
                    trace!(item = %item.id, category = %item.category, "throttled, backing off");
                    // An unrepresentable backoff falls back to retrying on the next tick.
                    item.not_before = now.checked_add(self.backoff);
                    deferred.push(item);
                    continue;
                }

                item.not_before = None;
                match tx.try_send(item) {
                    Ok(()) => {
                        PoolCounters::incr(&self.counters.dispatched);
                        admitted += 1;
                    }
                    Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                        PoolCounters::incr(&self.counters.requeued);
                        queue.add(item);
                        break;
                    }
                }
            }

            for item in deferred {
                queue.add(item);
            }
        }

        for item in expired {
            self.expire(item);
        }
        admitted
    }

    fn expire(&self, mut item: WorkItem) {
        PoolCounters::incr(&self.counters.expired);
        debug!(item = %item.id, category = %item.category, "deadline passed before dispatch");
        let result = WorkResult::deadline_exceeded(&item);
        item.complete(&result);
    }

    fn discard(&self, mut item: WorkItem) {
        PoolCounters::incr(&self.counters.discarded);
        let result = WorkResult::failure(&item, DispatchError::ShutDown.to_string(), Duration::ZERO);
        item.complete(&result);
    }

    /// Close admission and discard everything still queued.
    fn close(&self) -> usize {
        let drained = {
            let mut guard = lock(&self.admission);
            guard.dispatch = None;
            guard.queue.drain()
        };
        let count = drained.len();
        for item in drained {
            self.discard(item);
        }
        count
    }

    fn queue_depth(&self) -> usize {
        lock(&self.admission).queue.len()
    }
}

// ── WorkerPool ───────────────────────────────────────────────────────

/// Handle to a running worker pool. Cheap to clone.
///
/// Stopping is driven by the shared shutdown signal passed to [`WorkerPool::start`]:
/// admission closes, queued items are discarded (their callbacks receive a
/// failed result), workers finish the item they hold, and the result channel
/// closes once the last worker exits.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Validate `config`, spawn the admission loop and the workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &DispatchConfig,
        handlers: HandlerTable,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkResult>), DispatchError> {
        config.validate()?;

        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_capacity);
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let throttle = RateThrottle::new(config.throttle_window()).with_windows(config.category_windows()?);
        let inner = Arc::new(PoolInner {
            admission: Mutex::new(Admission {
                queue: PriorityQueue::new(),
                dispatch: Some(dispatch_tx),
            }),
            throttle,
            backoff: config.throttle_backoff(),
            counters: PoolCounters::default(),
        });

        let mut tasks = Vec::with_capacity(config.workers + 1);
        tasks.push(spawn_admission_loop(
            inner.clone(),
            config.admission_tick(),
            shutdown.clone(),
        ));

        let dispatch_rx = Arc::new(tokio::sync::Mutex::new(dispatch_rx));
        for index in 0..config.workers {
            tasks.push(spawn_worker(
                index,
                inner.clone(),
                handlers.clone(),
                dispatch_rx.clone(),
                results_tx.clone(),
                shutdown.clone(),
            ));
        }

        info!(
            workers = config.workers,
            capacity = config.dispatch_capacity,
            categories = handlers.len(),
            "worker pool started"
        );

        Ok((
            Self {
                inner,
                tasks: Arc::new(Mutex::new(tasks)),
            },
            results_rx,
        ))
    }

    /// Queue an item for admission. Never blocks.
    pub fn submit(&self, item: WorkItem) -> Result<(), DispatchError> {
        let mut guard = lock(&self.inner.admission);
        if guard.dispatch.is_none() {
            return Err(DispatchError::ShutDown);
        }
        PoolCounters::incr(&self.inner.counters.submitted);
        trace!(item = %item.id, priority = item.priority, "submitted");
        guard.queue.add(item);
        Ok(())
    }

    /// Force priority 10 and hand the item straight to the dispatch buffer,
    /// skipping the queue and the throttle. A full buffer returns it to the
    /// queue instead.
    pub fn submit_high_priority(&self, mut item: WorkItem) -> Result<(), DispatchError> {
        item.priority = MAX_PRIORITY;
        let now = Instant::now();
        let expired = {
            let mut guard = lock(&self.inner.admission);
            let Admission { queue, dispatch } = &mut *guard;
            let Some(tx) = dispatch.as_ref() else {
                return Err(DispatchError::ShutDown);
            };
            PoolCounters::incr(&self.inner.counters.submitted);

            if item.is_expired(now) {
                Some(item)
            } else {
                match tx.try_send(item) {
                    Ok(()) => PoolCounters::incr(&self.inner.counters.dispatched),
                    Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                        PoolCounters::incr(&self.inner.counters.requeued);
                        queue.add(item);
                    }
                }
                None
            }
        };

        if let Some(item) = expired {
            self.inner.expire(item);
        }
        Ok(())
    }

    /// Best-effort handoff used for prefetch work.
    ///
    /// The item is returned when admission is closed, its deadline has
    /// passed, or the dispatch buffer is full. It is never queued or retried.
    pub fn try_dispatch(&self, item: WorkItem) -> Result<(), WorkItem> {
        let counters = &self.inner.counters;
        let guard = lock(&self.inner.admission);
        let Some(tx) = guard.dispatch.as_ref() else {
            return Err(item);
        };
        if item.is_expired(Instant::now()) {
            PoolCounters::incr(&counters.prefetch_skipped);
            return Err(item);
        }
        match tx.try_send(item) {
            Ok(()) => {
                PoolCounters::incr(&counters.submitted);
                PoolCounters::incr(&counters.dispatched);
                PoolCounters::incr(&counters.prefetch_accepted);
                Ok(())
            }
            Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                PoolCounters::incr(&counters.prefetch_skipped);
                Err(item)
            }
        }
    }

    /// Run one admission pass immediately instead of waiting for the next tick.
    pub fn admit_ready(&self) -> usize {
        self.inner.admit_ready(Instant::now())
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue_depth()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot(self.inner.queue_depth())
    }

    /// Whether admission has been closed by shutdown.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.admission).dispatch.is_none()
    }

    /// Wait for the admission loop and every worker to exit.
    pub async fn join(&self) {
        let handles: Vec<_> = lock(&*self.tasks).drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "pool task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

fn spawn_admission_loop(
    inner: Arc<PoolInner>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; give submitters one full period.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let admitted = inner.admit_ready(Instant::now());
                    if admitted > 0 {
                        trace!(admitted, "admission tick");
                    }
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        let discarded = inner.close();
        info!(discarded, "admission loop stopped");
    })
}

fn spawn_worker(
    index: usize,
    inner: Arc<PoolInner>,
    handlers: HandlerTable,
    dispatch: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    results: mpsc::UnboundedSender<WorkResult>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(worker = index, "worker started");

        loop {
            let next = {
                let mut rx = dispatch.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => None,
                    item = rx.recv() => item,
                }
            };
            let Some(mut item) = next else { break };
            let callback = item.take_callback();

            PoolCounters::incr(&inner.counters.in_flight);
            let result = handlers.run(&item).await;
            PoolCounters::decr(&inner.counters.in_flight);

            if result.success {
                PoolCounters::incr(&inner.counters.completed);
            } else {
                PoolCounters::incr(&inner.counters.failed);
                debug!(
                    worker = index,
                    item = %result.id,
                    error = result.error.as_deref().unwrap_or_default(),
                    "work item failed"
                );
            }

            if let Some(callback) = callback {
                callback(&result);
            }
            if results.send(result).is_err() {
                trace!(worker = index, "result receiver dropped");
            }
        }

        // Admission drops the only sender when it closes, so this ends once
        // the buffer is empty.
        let mut rx = dispatch.lock().await;
        while let Some(item) = rx.recv().await {
            inner.discard(item);
        }

        debug!(worker = index, "worker stopped");
    })
}
