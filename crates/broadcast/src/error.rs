use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("subscription already exists: {0}")]
    DuplicateSubscription(String),

    #[error("broadcaster is shut down")]
    ShutDown,

    #[error("config error: {0}")]
    Config(String),
}
