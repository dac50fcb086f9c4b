//! Per-resource entries: `<namespace>/<id>` keys, fetch-or-load, invalidation.
//!
//! These keys are independent of request fingerprints. A write path calls
//! [`ResourceCache::invalidate`] so the next read of that resource misses.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::error::CacheError;
use super::store::Store;

/// Read-through cache for individually addressed resources.
///
/// # Examples
///
/// ```
/// use std::{convert::Infallible, sync::Arc, time::Duration};
/// use bytes::Bytes;
/// use readthrough::cache::{MemoryStore, ResourceCache};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let products = ResourceCache::new(Arc::new(MemoryStore::new()), "product", Duration::from_secs(600));
/// assert_eq!(products.key(7), "product/7");
///
/// let body = products
///     .fetch(7, || async { Ok::<_, Infallible>(Bytes::from_static(b"{\"id\":7}")) })
///     .await
///     .unwrap();
/// assert_eq!(body.as_ref(), b"{\"id\":7}");
///
/// assert!(products.invalidate(7).await.unwrap());
/// # });
/// ```
pub struct ResourceCache<S: ?Sized = dyn Store> {
    store: Arc<S>,
    namespace: String,
    ttl: Duration,
}

impl<S: ?Sized> Clone for ResourceCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            ttl: self.ttl,
        }
    }
}

impl<S> ResourceCache<S>
where
    S: Store + ?Sized,
{
    pub fn new(store: Arc<S>, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `<namespace>/<id>`
    pub fn key(&self, id: impl Display) -> String {
        format!("{}/{}", self.namespace, id)
    }

    /// `<namespace>/<id>/<aspect>`, for sub-representations such as details.
    pub fn sub_key(&self, id: impl Display, aspect: &str) -> String {
        format!("{}/{}/{}", self.namespace, id, aspect)
    }

    /// Returns the cached representation of `id`, or loads and stores it.
    ///
    /// Store failures never fail the fetch: a failed read counts as a miss
    /// and a failed write is logged. Errors from `load` are returned as-is
    /// and nothing is stored.
    pub async fn fetch<F, Fut, E>(&self, id: impl Display, load: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        self.fetch_key(self.key(id), load).await
    }

    /// [`fetch`](Self::fetch) for the `aspect` sub-key of `id`.
    pub async fn fetch_aspect<F, Fut, E>(
        &self,
        id: impl Display,
        aspect: &str,
        load: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        self.fetch_key(self.sub_key(id, aspect), load).await
    }

    /// Deletes the entry for `id` so the next fetch reloads it.
    ///
    /// Returns `true` if an entry was present. Sub-keys of `id` are left alone.
    pub async fn invalidate(&self, id: impl Display) -> Result<bool, CacheError> {
        let key = self.key(id);
        let removed = self.store.delete(&key).await?;
        debug!(key = %key, removed, "resource invalidated");
        Ok(removed)
    }

    /// Deletes the `aspect` sub-entry of `id`.
    pub async fn invalidate_aspect(&self, id: impl Display, aspect: &str) -> Result<bool, CacheError> {
        let key = self.sub_key(id, aspect);
        let removed = self.store.delete(&key).await?;
        debug!(key = %key, removed, "resource aspect invalidated");
        Ok(removed)
    }

    async fn fetch_key<F, Fut, E>(&self, key: String, load: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        match self.store.get(&key).await {
            Ok(Some(payload)) if !payload.is_empty() => {
                debug!(key = %key, "resource cache hit");
                return Ok(payload);
            }
            Ok(_) => debug!(key = %key, "resource cache miss"),
            Err(err) => warn!(key = %key, error = %err, "resource cache read failed, loading"),
        }

        let payload = load().await?;
        if let Err(err) = self.store.set(&key, payload.clone(), self.ttl).await {
            warn!(key = %key, error = %err, "resource cache write failed");
        }
        Ok(payload)
    }
}
