//! Read-through response caching.
//!
//! Per request: fingerprint → lookup → on a hit answer `200 OK` with the
//! stored body; on a miss run the downstream handler, store its body for the
//! configured TTL, and return its response unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::fingerprint::{CacheKey, Fingerprint};
use super::store::Store;
use crate::{
    Request, Response, StatusCode,
    context::Context,
    middleware::{BoxFuture, Middleware, Next},
};

/// Read-through cache in front of a downstream handler.
///
/// Use [`call`](Self::call) directly to get store failures as
/// [`CacheError`], or add the cache to a
/// [`Pipeline`](crate::middleware::Pipeline) as [`Middleware`], where a
/// propagated failure becomes `500 Internal Server Error`.
///
/// The downstream body is stored whatever its status; a cached `404` body is
/// served as `200 OK` on later hits. Two concurrent misses for one key both
/// run the downstream handler and the last write wins.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use readthrough::cache::{CacheConfig, HttpCache, MemoryStore};
/// use readthrough::middleware::Pipeline;
/// use readthrough::{Method, Request, Response, StatusCode};
///
/// let cache = HttpCache::new(Arc::new(MemoryStore::new()), CacheConfig::default());
/// let app = Pipeline::new(|_ctx| async {
///     Response::new(StatusCode::Ok).body(r#"{"id":1,"color":"red"}"#)
/// })
/// .layer(cache);
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let response = rt.block_on(app.handle(Request::builder(Method::Get, "/items?color=red").build()));
/// assert_eq!(response.status(), StatusCode::Ok);
/// ```
pub struct HttpCache<S: ?Sized = dyn Store> {
    store: Arc<S>,
    config: CacheConfig,
}

impl<S: ?Sized> Clone for HttpCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: ?Sized> fmt::Debug for HttpCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> HttpCache<S>
where
    S: Store + ?Sized,
{
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Serves `ctx` from the cache or through `downstream`.
    ///
    /// `downstream` runs only on a miss; before it runs, the request's
    /// [`CacheKey`] is inserted into the context extensions.
    ///
    /// # Errors
    ///
    /// [`CacheError::Store`] when storing the downstream body fails and rescue
    /// mode is off. The downstream response is discarded in that case.
    pub async fn call<F, Fut>(&self, mut ctx: Context, downstream: F) -> Result<Response, CacheError>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Response>,
    {
        let fingerprint = Fingerprint::from_request(ctx.request());
        let key = fingerprint.cache_key();

        if self.config.logging_enabled() {
            debug!(
                method = %fingerprint.method(),
                path = fingerprint.path(),
                params = %fingerprint.params(),
                headers = ?fingerprint.headers(),
                key = %key,
                "cache lookup"
            );
        }

        if let Some(payload) = self.lookup(&key).await {
            if self.config.logging_enabled() {
                debug!(key = %key, bytes = payload.len(), "cache hit");
            }
            return Ok(Response::new(StatusCode::Ok).body(payload));
        }

        if self.config.logging_enabled() {
            debug!(key = %key, "cache miss");
        }

        ctx.extensions_mut().insert(key.clone());
        let response = downstream(ctx).await;
        self.populate(&key, response.content().clone()).await?;

        Ok(response)
    }

    /// Deletes the entry `request` would be served from, so the next
    /// equivalent request misses.
    ///
    /// Returns `true` if an entry was present. Only the variant with exactly
    /// `request`'s allow-listed headers is removed.
    ///
    /// # Errors
    ///
    /// [`CacheError::Store`] when the delete fails, whatever the rescue mode.
    pub async fn invalidate(&self, request: &Request) -> Result<bool, CacheError> {
        let key = Fingerprint::from_request(request).cache_key();
        let removed = self.store.delete(key.as_str()).await?;
        if self.config.logging_enabled() {
            debug!(key = %key, removed, "cache entry invalidated");
        }
        Ok(removed)
    }

    // Absent, empty, and unreadable entries all count as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        match self.store.get(key.as_str()).await {
            Ok(Some(payload)) if !payload.is_empty() => Some(payload),
            Ok(_) => None,
            Err(err) => {
                if self.config.logging_enabled() {
                    warn!(key = %key, error = %err, "cache read failed, treating as miss");
                }
                None
            }
        }
    }

    async fn populate(&self, key: &CacheKey, body: Bytes) -> Result<(), CacheError> {
        let ttl = self.config.ttl();
        match self.store.set(key.as_str(), body, ttl).await {
            Ok(()) => {
                if self.config.logging_enabled() {
                    debug!(key = %key, ttl_secs = ttl.as_secs(), "cache stored");
                }
                Ok(())
            }
            Err(err) if self.config.is_rescue() => {
                if self.config.logging_enabled() {
                    error!(key = %key, error = %err, "cache write failed, serving uncached response");
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl<S> Middleware for HttpCache<S>
where
    S: Store + ?Sized + 'static,
{
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        let cache = self.clone();
        Box::pin(async move {
            match cache.call(ctx, |ctx| next.run(ctx)).await {
                Ok(response) => response,
                Err(err) => {
                    error!(error = %err, "response cache aborted the request");
                    Response::new(StatusCode::InternalServerError).body("Internal Server Error")
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::cache::MemoryStore;
    use crate::cache::testing::FailingStore;
    use crate::http::{Method, Request};
    use crate::middleware::Pipeline;

    const BODY: &str = r#"{"id":1,"color":"red"}"#;

    // Downstream handler with a fixed answer that counts its invocations.
    #[derive(Clone)]
    struct Upstream {
        status: StatusCode,
        body: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl Upstream {
        fn new(status: StatusCode, body: &'static str) -> Self {
            Self {
                status,
                body,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn respond(&self) -> BoxFuture<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (status, body) = (self.status, self.body);
            Box::pin(async move {
                Response::new(status)
                    .header("Content-Type", "application/json")
                    .body(body)
            })
        }
    }

    async fn serve<S>(
        cache: &HttpCache<S>,
        upstream: &Upstream,
        request: Request,
    ) -> Result<Response, CacheError>
    where
        S: Store + ?Sized,
    {
        cache.call(request.into(), |_| upstream.respond()).await
    }

    fn items_request() -> Request {
        Request::builder(Method::Get, "/items?color=red")
            .header("Accept", "application/json")
            .build()
    }

    fn memory_cache(config: CacheConfig) -> HttpCache<MemoryStore> {
        HttpCache::new(Arc::new(MemoryStore::new()), config)
    }

    fn failing_writes(config: CacheConfig) -> HttpCache {
        let store: Arc<dyn Store> = Arc::new(FailingStore::failing_writes());
        HttpCache::new(store, config)
    }

    #[tokio::test]
    async fn miss_then_hit_skips_downstream() {
        let cache = memory_cache(CacheConfig::default());
        let upstream = Upstream::new(StatusCode::Created, BODY);

        let first = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::Created);
        assert_eq!(first.headers().get("content-type"), Some("application/json"));
        assert_eq!(first.content().as_ref(), BODY.as_bytes());

        let second = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::Ok);
        assert!(second.headers().is_empty());
        assert_eq!(second.content().as_ref(), BODY.as_bytes());
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn stores_under_the_fingerprint_key() {
        let cache = memory_cache(CacheConfig::default());
        let upstream = Upstream::new(StatusCode::Ok, BODY);
        serve(&cache, &upstream, items_request()).await.unwrap();

        let stored = cache
            .store()
            .get("http-cache-GET /items{color:red}{ACCEPT:application/json}")
            .await
            .unwrap();
        assert_eq!(stored.as_deref(), Some(BODY.as_bytes()));
    }

    #[tokio::test]
    async fn downstream_sees_the_cache_key() {
        let cache = memory_cache(CacheConfig::default());
        let response = cache
            .call(items_request().into(), |ctx: Context| async move {
                let key = ctx
                    .extensions()
                    .get::<CacheKey>()
                    .map(|k| k.as_str().to_owned())
                    .unwrap_or_default();
                Response::new(StatusCode::Ok).body(key)
            })
            .await
            .unwrap();
        assert!(response.content().starts_with(b"http-cache-GET /items"));
    }

    #[tokio::test]
    async fn only_allowed_headers_split_the_cache() {
        let cache = memory_cache(CacheConfig::default());
        let upstream = Upstream::new(StatusCode::Ok, BODY);

        serve(&cache, &upstream, items_request()).await.unwrap();
        let traced = Request::builder(Method::Get, "/items?color=red")
            .header("Accept", "application/json")
            .header("X-Request-Id", "trace-42")
            .build();
        serve(&cache, &upstream, traced).await.unwrap();
        assert_eq!(upstream.calls(), 1);

        let csv = Request::builder(Method::Get, "/items?color=red")
            .header("Accept", "text/csv")
            .build();
        serve(&cache, &upstream, csv).await.unwrap();
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = memory_cache(CacheConfig::default().with_ttl(Duration::from_secs(3600)));
        let upstream = Upstream::new(StatusCode::Ok, BODY);

        serve(&cache, &upstream, items_request()).await.unwrap();
        tokio::time::advance(Duration::from_secs(3599)).await;
        let hit = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(hit.content().as_ref(), BODY.as_bytes());
        assert_eq!(upstream.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn error_responses_are_cached_too() {
        let cache = memory_cache(CacheConfig::default());
        let upstream = Upstream::new(StatusCode::NotFound, "no such item");

        let miss = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(miss.status(), StatusCode::NotFound);

        let hit = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(hit.status(), StatusCode::Ok);
        assert_eq!(hit.content().as_ref(), b"no such item");
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn empty_stored_body_is_a_miss() {
        let cache = memory_cache(CacheConfig::default());
        let upstream = Upstream::new(StatusCode::NoContent, "");

        serve(&cache, &upstream, items_request()).await.unwrap();
        serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn read_failure_falls_through_to_downstream() {
        let store = Arc::new(FailingStore::failing_reads());
        let cache = HttpCache::new(Arc::clone(&store), CacheConfig::default());
        let upstream = Upstream::new(StatusCode::Ok, BODY);

        let response = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(response.content().as_ref(), BODY.as_bytes());
        assert_eq!(upstream.calls(), 1);
        assert_eq!(store.write_attempts(), 1);
    }

    #[tokio::test]
    async fn rescue_swallows_write_failures() {
        let cache = failing_writes(CacheConfig::default().with_rescue(true));
        let upstream = Upstream::new(StatusCode::Created, BODY);

        let response = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::Created);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(response.content().as_ref(), BODY.as_bytes());
    }

    #[tokio::test]
    async fn without_rescue_write_failures_propagate() {
        let cache = failing_writes(CacheConfig::default());
        let upstream = Upstream::new(StatusCode::Ok, BODY);

        let result = serve(&cache, &upstream, items_request()).await;
        assert!(matches!(result, Err(CacheError::Store(_))));
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn logging_off_changes_nothing() {
        let cache = failing_writes(CacheConfig::default().with_rescue(true).with_logging(false));
        let upstream = Upstream::new(StatusCode::Ok, BODY);

        let response = serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(response.content().as_ref(), BODY.as_bytes());
    }

    #[tokio::test]
    async fn as_middleware_hit_and_miss() {
        let upstream = Upstream::new(StatusCode::Ok, BODY);
        let handler = upstream.clone();
        let app = Pipeline::new(move |_ctx| handler.respond())
            .layer(memory_cache(CacheConfig::default()));

        let miss = app.handle(items_request()).await;
        let hit = app.handle(items_request()).await;
        assert_eq!(miss.content(), hit.content());
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn as_middleware_propagated_failure_hides_downstream_body() {
        let upstream = Upstream::new(StatusCode::Ok, BODY);
        let handler = upstream.clone();
        let app = Pipeline::new(move |_ctx| handler.respond())
            .layer(failing_writes(CacheConfig::default()));

        let response = app.handle(items_request()).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_ne!(response.content().as_ref(), BODY.as_bytes());
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_the_next_request_to_miss() {
        let cache = memory_cache(CacheConfig::default());
        let upstream = Upstream::new(StatusCode::Ok, BODY);

        serve(&cache, &upstream, items_request()).await.unwrap();
        serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(upstream.calls(), 1);

        assert!(cache.invalidate(&items_request()).await.unwrap());
        serve(&cache, &upstream, items_request()).await.unwrap();
        assert_eq!(upstream.calls(), 2);

        let other = Request::builder(Method::Get, "/items?color=blue").build();
        assert!(!cache.invalidate(&other).await.unwrap());
    }

    #[tokio::test]
    async fn invalidate_surfaces_delete_failures() {
        let cache = failing_writes(CacheConfig::default().with_rescue(true));
        assert!(matches!(
            cache.invalidate(&items_request()).await,
            Err(CacheError::Store(_))
        ));
    }

    #[tokio::test]
    async fn write_path_invalidation_refreshes_layered_reads() {
        let version = Arc::new(AtomicUsize::new(0));
        let current = Arc::clone(&version);
        let cache = memory_cache(CacheConfig::default());
        let app = Pipeline::new(move |_ctx| {
            let body = format!("v{}", current.load(Ordering::SeqCst));
            async move { Response::new(StatusCode::Ok).body(body) }
        })
        .layer(cache.clone());

        let before = app.handle(items_request()).await;
        version.store(1, Ordering::SeqCst);
        let stale = app.handle(items_request()).await;
        assert_eq!(before.content().as_ref(), b"v0");
        assert_eq!(stale.content().as_ref(), b"v0");

        cache.invalidate(&items_request()).await.unwrap();
        let fresh = app.handle(items_request()).await;
        assert_eq!(fresh.content().as_ref(), b"v1");
    }
}
