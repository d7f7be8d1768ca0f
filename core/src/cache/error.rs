use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache store is not connected")]
    NotConnected,

    #[error("invalid expire time: ttl must be positive and within range")]
    InvalidTtl,

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("cache store error: {0}")]
    Backend(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
