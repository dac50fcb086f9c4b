//! # readthrough
//!
//! Read-through HTTP response caching over an async HTTP/1.1 server.
//!
//! A request is reduced to a [`Fingerprint`](cache::Fingerprint) (method,
//! path, parameters, and a fixed set of headers). The fingerprint's key is
//! looked up in a [`Store`](cache::Store); a hit is answered directly and a
//! miss runs the rest of the pipeline and stores what it produced.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use readthrough::cache::{CacheConfig, HttpCache, MemoryStore};
//! use readthrough::middleware::Pipeline;
//! use readthrough::{Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let pipeline = Pipeline::new(|ctx| async move {
//!         Response::new(StatusCode::Ok).body(format!("rendered {}", ctx.request().path()))
//!     })
//!     .layer(HttpCache::new(store, CacheConfig::from_env()));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(move |req| pipeline.handle(req)).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

pub use cache::{CacheConfig, HttpCache, MemoryStore};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
