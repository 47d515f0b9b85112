use std::time::Duration;

use thiserror::Error;

/// Errors raised by a cache backend. The [`Cache`](crate::Cache) wrapper
/// logs and swallows them; only `connect` hands them to the caller.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
