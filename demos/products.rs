//! Product catalogue served through the response cache.
//!
//! ```text
//! cargo run --example products
//! curl localhost:8080/products
//! curl localhost:8080/products/1/details
//! curl -X PUT -d 'name=Luke+Lars' localhost:8080/products/1
//! ```
//!
//! `GET /products` goes through [`HttpCache`]; single products and their
//! details are cached per resource. Every other request bypasses the response
//! cache, so an update always reaches its handler and evicts what it changed.
//!
//! `HTTP_CACHE_TTL_SECS`, `HTTP_CACHE_RESCUE` and `HTTP_CACHE_LOGGING` tune the
//! cache; `RUST_LOG=readthrough=debug` shows its hits and misses.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use readthrough::cache::{
    ALLOWED_HEADERS, CacheConfig, CacheError, HttpCache, MemoryStore, ResourceCache, Store,
};
use readthrough::context::Context;
use readthrough::middleware::{BoxFuture, Pipeline};
use readthrough::{Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DETAILS: &str = "details";

#[derive(Debug, Clone, Serialize)]
struct Product {
    id: u32,
    name: String,
    height: u32,
    homeworld: String,
}

impl Product {
    fn new(id: u32, name: &str, height: u32, homeworld: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            height,
            homeworld: homeworld.to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Details<'a> {
    #[serde(flatten)]
    product: &'a Product,
    height_m: f64,
}

struct Catalogue {
    products: RwLock<Vec<Product>>,
}

impl Catalogue {
    fn fixture() -> Self {
        let products = vec![
            Product::new(1, "Luke Skywalker", 172, "Tatooine"),
            Product::new(2, "C-3PO", 167, "Tatooine"),
            Product::new(3, "R2-D2", 96, "Naboo"),
            Product::new(4, "Darth Vader", 202, "Tatooine"),
        ];
        Self {
            products: RwLock::new(products),
        }
    }

    // The sleeps stand in for a slow database or upstream API.
    async fn load_all(&self) -> Result<Bytes, StatusCode> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let products = self.products.read().await;
        to_json(products.as_slice())
    }

    async fn load_one(&self, id: u32) -> Result<Bytes, StatusCode> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let products = self.products.read().await;
        to_json(find(&products, id)?)
    }

    async fn load_details(&self, id: u32) -> Result<Bytes, StatusCode> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let products = self.products.read().await;
        let product = find(&products, id)?;
        to_json(&Details {
            product,
            height_m: f64::from(product.height) / 100.0,
        })
    }

    async fn rename(&self, id: u32, name: &str) -> Result<Bytes, StatusCode> {
        let mut products = self.products.write().await;
        let product = products
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StatusCode::NotFound)?;
        product.name = name.to_owned();
        to_json(&*product)
    }
}

fn find(products: &[Product], id: u32) -> Result<&Product, StatusCode> {
    products
        .iter()
        .find(|p| p.id == id)
        .ok_or(StatusCode::NotFound)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, StatusCode> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|_| StatusCode::InternalServerError)
}

#[derive(Clone)]
struct App {
    catalogue: Arc<Catalogue>,
    products: ResourceCache,
    listing: HttpCache,
}

impl App {
    async fn route(self, ctx: Context) -> Response {
        let request = ctx.request();
        let segments: Vec<&str> = request.path().trim_matches('/').split('/').collect();

        let result = match (request.method(), segments.as_slice()) {
            (Method::Get, ["products"]) => self.catalogue.load_all().await,
            (Method::Get, ["products", id]) => match parse_id(id) {
                Some(id) => self.products.fetch(id, || self.catalogue.load_one(id)).await,
                None => Err(StatusCode::NotFound),
            },
            (Method::Get, ["products", id, DETAILS]) => match parse_id(id) {
                Some(id) => {
                    self.products
                        .fetch_aspect(id, DETAILS, || self.catalogue.load_details(id))
                        .await
                }
                None => Err(StatusCode::NotFound),
            },
            (Method::Put, ["products", id]) => match parse_id(id) {
                Some(id) => self.update(id, request).await,
                None => Err(StatusCode::NotFound),
            },
            (_, ["products", ..]) => Err(StatusCode::MethodNotAllowed),
            _ => Err(StatusCode::NotFound),
        };

        match result {
            Ok(body) => Response::new(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(body),
            Err(status) => Response::new(status).body(status.canonical_reason()),
        }
    }

    async fn update(&self, id: u32, request: &Request) -> Result<Bytes, StatusCode> {
        let body = match request.params().get_str("name") {
            Some(name) => self.catalogue.rename(id, name).await?,
            None => self.catalogue.load_one(id).await?,
        };
        if let Err(err) = self.evict(id, request).await {
            error!(id, error = %err, "failed to invalidate product entries");
            return Err(StatusCode::ServiceUnavailable);
        }
        Ok(body)
    }

    async fn evict(&self, id: u32, request: &Request) -> Result<(), CacheError> {
        self.products.invalidate(id).await?;
        self.products.invalidate_aspect(id, DETAILS).await?;
        // Listing variants for other header sets expire by TTL.
        let listed = self.listing.invalidate(&listing_as_seen_by(request)).await?;
        info!(id, listed, "product entries invalidated");
        Ok(())
    }
}

/// `GET /products` with the allow-listed headers of `request`.
fn listing_as_seen_by(request: &Request) -> Request {
    let mut listing = Request::builder(Method::Get, "/products");
    for name in ALLOWED_HEADERS {
        for value in request.headers().get_all(name) {
            listing = listing.header(name, value);
        }
    }
    listing.build()
}

fn parse_id(raw: &str) -> Option<u32> {
    raw.parse().ok()
}

/// Sends the collection read through the response cache and everything else
/// straight to the handler.
#[derive(Clone)]
struct Routes {
    cached: Pipeline,
    direct: Pipeline,
}

impl Routes {
    fn new(store: Arc<dyn Store>, config: CacheConfig) -> Self {
        let listing = HttpCache::new(Arc::clone(&store), config);
        let app = App {
            catalogue: Arc::new(Catalogue::fixture()),
            products: ResourceCache::new(store, "product", config.ttl()),
            listing: listing.clone(),
        };

        let direct = Pipeline::new(move |ctx| app.clone().route(ctx));
        let cached = direct.clone().layer(listing);
        Self { cached, direct }
    }

    fn handle(&self, request: Request) -> BoxFuture<Response> {
        let is_listing = *request.method() == Method::Get
            && request.path().trim_end_matches('/') == "/products";
        if is_listing {
            self.cached.handle(request)
        } else {
            self.direct.handle(request)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CacheConfig::from_env();
    let routes = Routes::new(Arc::new(MemoryStore::new()), config);

    let addr = std::env::var("PRODUCTS_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());
    let server = Server::bind(&addr).await?;
    info!(address = %server.local_addr(), ttl = ?config.ttl(), "product catalogue ready");
    server.run(move |req| routes.handle(req)).await?;
    Ok(())
}
