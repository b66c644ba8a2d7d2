use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated by the admission loop, the workers and submitters.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted: AtomicU64,
    pub dispatched: AtomicU64,
    pub requeued: AtomicU64,
    pub throttled: AtomicU64,
    pub expired: AtomicU64,
    pub discarded: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub prefetch_accepted: AtomicU64,
    pub prefetch_skipped: AtomicU64,
    pub in_flight: AtomicU64,
}

impl PoolCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_depth: usize) -> PoolStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PoolStats {
            submitted: get(&self.submitted),
            dispatched: get(&self.dispatched),
            requeued: get(&self.requeued),
            throttled: get(&self.throttled),
            expired: get(&self.expired),
            discarded: get(&self.discarded),
            completed: get(&self.completed),
            failed: get(&self.failed),
            prefetch_accepted: get(&self.prefetch_accepted),
            prefetch_skipped: get(&self.prefetch_skipped),
            in_flight: get(&self.in_flight),
            queue_depth,
        }
    }
}

/// Point-in-time view of the worker pool.
///
/// Once the pool is idle, `completed + failed + expired + discarded` equals
/// `submitted`. `requeued` and `throttled` count returns to the queue and may
/// exceed one per item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub requeued: u64,
    pub throttled: u64,
    pub expired: u64,
    /// Items dropped from the queue or the dispatch buffer at shutdown.
    pub discarded: u64,
    /// Results with `success == true`.
    pub completed: u64,
    pub failed: u64,
    pub prefetch_accepted: u64,
    pub prefetch_skipped: u64,
    pub in_flight: u64,
    pub queue_depth: usize,
}

impl PoolStats {
    /// Items accounted for by a terminal outcome.
    pub fn settled(&self) -> u64 {
        self.completed + self.failed + self.expired + self.discarded
    }
}
