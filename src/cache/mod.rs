//! Read-through HTTP response caching.
//!
//! - [`Fingerprint`] / [`CacheKey`]: what identifies a cacheable request.
//! - [`Store`]: the external key-value store with TTL; [`MemoryStore`] is
//!   the in-process implementation.
//! - [`HttpCache`]: lookup, delegate on miss, store the result.
//! - [`ResourceCache`]: `<namespace>/<id>` entries and their invalidation.
//! - [`CacheConfig`]: TTL, rescue mode, diagnostic logging.
//!
//! The store is always injected; nothing in this module holds global state.

mod config;
mod error;
mod fingerprint;
mod memory;
mod middleware;
mod resource;
mod store;

pub use config::{CacheConfig, DEFAULT_TTL};
pub use error::CacheError;
pub use fingerprint::{ALLOWED_HEADERS, CacheKey, Fingerprint, KEY_PREFIX};
pub use memory::MemoryStore;
pub use middleware::HttpCache;
pub use resource::ResourceCache;
pub use store::{Store, StoreError, StoreResult};
