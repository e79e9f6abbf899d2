use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum NodeServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("region {0} not found")]
    RegionNotFound(String),

    #[error("node {0} not found")]
    NodeNotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
