//! Three-tier result cache with promotion, pluggable eviction and
//! correlation-driven prefetch.
//!
//! - [`TieredCache`]: hot (strict LRU), warm (frequency/ttl blend) and cold
//!   (ttl, periodically swept) tiers, each behind its own lock
//! - [`PrefetchEngine`]: per-key access patterns; on a miss, correlated keys
//!   are submitted as best-effort work through a [`PrefetchSink`]
//! - [`EvictionPolicy`]: scoring contract the tiers consult when full

pub mod config;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod pattern;
pub mod prefetch;
pub mod stats;
pub mod sweeper;
pub mod tier;
pub mod tiered;

pub use config::CacheConfig;
pub use entry::{CacheEntry, Tier};
pub use error::CacheError;
pub use eviction::{EvictionContext, EvictionPolicy, FrequencyTtlPolicy, LruPolicy, TtlPolicy};
pub use prefetch::{AccessPattern, PrefetchEngine, PrefetchSink};
pub use stats::{CacheStats, TierStats};
pub use sweeper::spawn_cold_sweeper;
pub use tiered::{CacheHit, InvalidationEvent, TieredCache};
