use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown work category: {0}")]
    UnknownCategory(String),

    #[error("unknown activity level: {0}")]
    UnknownActivityLevel(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}
