//! Dispatch error types.

use thiserror::Error;
use undertow_core::WorkCategory;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unrecognized category: {0}")]
    UnrecognizedCategory(WorkCategory),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("handler error: {0}")]
    Handler(String),

    #[error("worker pool is shutting down")]
    ShutDown,

    #[error("config error: {0}")]
    Config(String),
}
