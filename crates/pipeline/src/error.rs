use thiserror::Error;
use undertow_broadcast::BroadcastError;
use undertow_cache::CacheError;
use undertow_dispatch::DispatchError;

/// Errors surfaced by the pipeline owner and its configuration.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}
