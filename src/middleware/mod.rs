//! Middleware pipeline: ordered layers in front of a downstream endpoint.
//!
//! - [`Middleware`]: trait implemented by every layer.
//! - [`Next`]: cursor into the rest of the chain; [`Next::run`] advances it.
//! - [`Endpoint`]: the downstream handler that produces the real response.
//! - [`Pipeline`]: owns the layers and the endpoint and runs requests through
//!   them.
//!
//! Layers run in the order they were added: the first [`Pipeline::layer`]
//! call is the outermost and sees the request first.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Request, Response, context::Context};

/// A boxed, `Send` future, as returned by [`Middleware::handle`].
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> BoxFuture<Response> + Send + Sync>;

/// A type-erased downstream handler.
pub type Endpoint = Arc<dyn Fn(Context) -> BoxFuture<Response> + Send + Sync>;

/// Wraps an async closure as an [`Endpoint`].
///
/// # Examples
///
/// ```
/// use readthrough::{Response, StatusCode, middleware::endpoint};
///
/// let ep = endpoint(|_ctx| async { Response::new(StatusCode::Ok).body("hi") });
/// ```
pub fn endpoint<F, Fut>(handler: F) -> Endpoint
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: Context| -> BoxFuture<Response> { Box::pin(handler(ctx)) })
}

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once. Once every layer has run, the endpoint is invoked.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Which layer the next `run` call invokes.
    index: usize,
    endpoint: Endpoint,
}

impl Next {
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Endpoint) -> Self {
        Self {
            middlewares,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next layer, or the endpoint when no layers remain.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may pass
/// the request through, short-circuit with their own [`Response`], or
/// decorate the downstream response.
///
/// Implementations are shared across Tokio tasks, so they must be
/// `Send + Sync` and return a `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response>;
}

/// Layers plus endpoint, ready to serve requests.
///
/// Cloning is cheap; clones share the same layers and endpoint.
///
/// # Examples
///
/// ```
/// use readthrough::{Method, Request, Response, StatusCode, middleware::Pipeline};
///
/// let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok).body("pong") });
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let response = rt.block_on(pipeline.handle(Request::builder(Method::Get, "/ping").build()));
/// assert_eq!(response.content().as_ref(), b"pong");
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Endpoint,
}

impl Pipeline {
    /// A pipeline with no layers in front of `handler`.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self::from_endpoint(endpoint(handler))
    }

    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            middlewares: Arc::from(Vec::new()),
            endpoint,
        }
    }

    /// Adds `middleware` inside every layer added before it.
    #[must_use]
    pub fn layer<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layer_arc(Arc::new(middleware))
    }

    /// Like [`layer`](Self::layer), for middleware the caller keeps a handle to.
    #[must_use]
    pub fn layer_arc<M>(self, middleware: Arc<M>) -> Self
    where
        M: Middleware + 'static,
    {
        let mut layers = self.middlewares.to_vec();
        layers.push(from_middleware(middleware));
        Self {
            middlewares: layers.into(),
            endpoint: self.endpoint,
        }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `request` through every layer and the endpoint.
    pub fn handle(&self, request: Request) -> BoxFuture<Response> {
        let next = Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.endpoint));
        Box::pin(next.run(Context::new(request)))
    }
}
