//! Owner of a running undertow pipeline.
//!
//! [`Pipeline::start`] builds the worker pool, the tiered cache and the
//! throttled broadcaster from one [`PipelineConfig`], wires them together
//! (prefetch into the pool, results into the cache and out to subscribers,
//! invalidations out to subscribers) and holds the single shutdown signal.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;

pub use config::{PipelineConfig, PipelineSettings};
pub use error::PipelineError;
pub use metrics::{History, PipelineStats, RouterStats, StatsPoint};
pub use pipeline::Pipeline;
