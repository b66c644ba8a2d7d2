use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("config error: {0}")]
    Config(String),
}
