//! The key-value store the cache reads from and writes to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors reported by a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache store {op} failed for key `{key}`: {reason}")]
    Operation {
        op: &'static str,
        key: String,
        reason: String,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A shared key-value store with per-entry TTL.
///
/// The cache relies only on per-key atomicity of single operations; it takes
/// no lock around a get/set pair. Entries whose TTL has elapsed must read as
/// absent.
///
/// Implemented for `Arc<S>`, so one store can back several caches.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the stored payload, or `None` when absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()>;

    /// Removes `key`. Returns `true` if an entry was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key).await
    }
}
