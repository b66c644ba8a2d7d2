use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use undertow_core::sync::shutdown_requested;

use crate::tiered::TieredCache;

/// Spawn the periodic cold-tier expiry sweep.
///
/// Returns a `JoinHandle` that resolves once shutdown is signalled.
pub fn spawn_cold_sweeper(
    cache: Arc<TieredCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = cache.sweep_cold();
                    if swept > 0 {
                        debug!(swept, "cold tier sweep");
                    }
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!("cold sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use undertow_core::{Payload, WorkCategory};

    use super::*;
    use crate::config::CacheConfig;
    use crate::entry::Tier;

    #[tokio::test]
    async fn sweeper_expires_cold_entries_and_stops() {
        let (cache, _rx) = TieredCache::new(&CacheConfig::default()).unwrap();
        let cache = Arc::new(cache);
        cache.set("k", Payload::Empty, WorkCategory::Diagnostic, Duration::from_millis(5));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_cold_sweeper(cache.clone(), Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let cold = cache.stats().tier(Tier::Cold).cloned().unwrap();
        assert_eq!(cold.entries, 0);
        assert_eq!(cold.expirations, 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
