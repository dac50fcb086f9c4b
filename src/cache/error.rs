use thiserror::Error;

use super::store::StoreError;

/// Errors the cache surfaces to its caller.
///
/// Only store failures that rescue mode did not swallow end up here; read
/// failures are always treated as misses.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("response cache store failure: {0}")]
    Store(#[from] StoreError),
}
