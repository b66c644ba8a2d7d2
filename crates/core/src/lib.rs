pub mod activity;
pub mod category;
pub mod error;
pub mod payload;
pub mod sync;
pub mod update;
pub mod work;

pub use activity::ActivityLevel;
pub use category::WorkCategory;
pub use error::CoreError;
pub use payload::{ContextSummary, Payload};
pub use update::Update;
pub use work::{clamp_priority, CompletionCallback, WorkItem, WorkResult, MAX_PRIORITY, MIN_PRIORITY};
