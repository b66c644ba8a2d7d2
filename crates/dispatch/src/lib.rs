//! Priority-ordered, rate-limited dispatch of background work.
//!
//! Items enter a [`PriorityQueue`], a periodic admission loop checks the
//! per-category [`RateThrottle`] and hands them to a bounded dispatch buffer,
//! and a fixed set of workers runs the handler registered for each category.

pub mod config;
pub mod error;
pub mod handler;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod throttle;

pub use config::DispatchConfig;
pub use error::DispatchError;
pub use handler::{HandlerError, HandlerOutput, HandlerTable, WorkHandler};
pub use pool::WorkerPool;
pub use queue::PriorityQueue;
pub use stats::PoolStats;
pub use throttle::RateThrottle;
