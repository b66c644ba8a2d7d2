//! Periodic broadcaster maintenance tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use undertow_core::sync::shutdown_requested;

use crate::broadcaster::ThrottledBroadcaster;

/// Drain the batch buffer every `interval`, with a last flush on shutdown.
pub fn spawn_flush_loop(
    broadcaster: Arc<ThrottledBroadcaster>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    broadcaster.flush();
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        let report = broadcaster.flush();
        info!(flushed = report.flushed, "flush loop stopped");
    })
}

/// Recompute the per-category bandwidth split every `interval`.
pub fn spawn_recalculation_loop(
    broadcaster: Arc<ThrottledBroadcaster>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    broadcaster.bandwidth().recalculate();
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!("bandwidth recalculation loop stopped");
    })
}
