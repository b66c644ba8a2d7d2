//! Throttled publish/subscribe broadcaster.
//!
//! Updates pass a per-category token bucket whose rate follows the user's
//! activity level and a demand-weighted bandwidth budget. Very high priority
//! skips the bucket; throttled high-priority updates wait in a bounded batch
//! buffer for the periodic flush; everything else that loses is dropped and
//! counted.

pub mod activity;
pub mod bandwidth;
pub mod broadcaster;
pub mod buffer;
pub mod config;
pub mod error;
pub mod loops;
pub mod rule;
pub mod stats;
pub mod subscription;

pub use activity::UserActivityTracker;
pub use bandwidth::BandwidthManager;
pub use broadcaster::{DistributionReport, FlushReport, PublishOutcome, ThrottledBroadcaster};
pub use buffer::BatchBuffer;
pub use config::BroadcastConfig;
pub use error::BroadcastError;
pub use loops::{spawn_flush_loop, spawn_recalculation_loop};
pub use rule::{ThrottleRule, TokenBucket};
pub use stats::BroadcastStats;
pub use subscription::{Filter, Subscription, SubscriptionHandle, SubscriptionStats};
