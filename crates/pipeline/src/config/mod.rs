//! Pipeline configuration: one TOML document with a table per component.
//!
//! ```toml
//! [dispatch]
//! workers = 8
//!
//! [cache]
//! hot_capacity = 512
//!
//! [broadcast.rules.diagnostic]
//! max_rate = 2.0
//! burst = 4
//!
//! [pipeline]
//! update_ttl_ms = 15000
//! ```
//!
//! Every field has a default, so an empty document is a valid config.
//! `UNDERTOW_SECTION_KEY` environment variables override individual fields
//! after parsing.

mod loading;
mod types;
mod validation;


pub use types::{PipelineConfig, PipelineSettings};
