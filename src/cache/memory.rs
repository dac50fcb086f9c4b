//! In-process [`Store`] with lazy TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use super::store::{Store, StoreResult};

#[derive(Debug)]
struct Entry {
    value: Bytes,
    // `None` when `now + ttl` does not fit in an `Instant`.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A concurrent in-memory store.
///
/// Expired entries are invisible to readers and removed on the read that
/// finds them, or in bulk by [`purge_expired`](Self::purge_expired). There is
/// no capacity bound or eviction.
///
/// Expiry is measured with [`tokio::time::Instant`], so a paused Tokio clock
/// controls it in tests. Clones share the same entries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use readthrough::cache::{MemoryStore, Store};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// store.set("product/1", "luke".into(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(store.get("product/1").await.unwrap().as_deref(), Some(&b"luke"[..]));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not expired.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // The guard above must be released before touching the shard again.
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()> {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries
            .insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}
