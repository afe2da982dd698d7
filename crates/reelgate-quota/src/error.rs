//! Counter store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// The counter store could not answer.
///
/// Every variant means "store unavailable"; none of them means the caller
/// is over quota.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Counter store timed out after {0} ms")]
    Timeout(u64),

    #[error("Unexpected counter store response: {0}")]
    InvalidResponse(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Timeout(_) => "timeout",
            StoreError::InvalidResponse(_) => "invalid_response",
            StoreError::Redis(_) => "redis",
        }
    }
}
