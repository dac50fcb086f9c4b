//! Request fingerprinting: the identity a response is cached under.
//!
//! A [`Fingerprint`] keeps only what can change the response: method, path,
//! decoded parameters, and the allow-listed headers in [`ALLOWED_HEADERS`].
//! Everything else (tracing ids, user agents, cookies) is dropped so it
//! cannot split the cache.
//!
//! ## Key format
//!
//! ```text
//! http-cache-<METHOD> <path>{<param>:<value>,...}{<HEADER>:<value>,...}
//! ```
//!
//! Parameters and headers are rendered in key order. A value that occurs
//! several times renders as `[a,b]`. Parameters render in their
//! percent-encoded form ([`Params::encoded`]), which is exact for any byte
//! sequence. The characters `\ { } [ ] : ,` and space are backslash-escaped
//! inside every component, so no two distinct fingerprints can render to the
//! same string.

use std::collections::BTreeMap;
use std::fmt;

use crate::http::{Headers, Method, ParamValue, Params, Request};

/// Header names (case-insensitive) that take part in the fingerprint.
pub const ALLOWED_HEADERS: [&str; 3] = ["content-language", "accept", "authorization"];

/// Namespace prepended to every rendered fingerprint.
pub const KEY_PREFIX: &str = "http-cache-";

/// The cacheable identity of a request.
///
/// # Examples
///
/// ```
/// use readthrough::cache::Fingerprint;
/// use readthrough::http::{Method, Request};
///
/// let request = Request::builder(Method::Get, "/items?color=red")
///     .header("Accept", "application/json")
///     .header("X-Request-Id", "7f3a")
///     .build();
///
/// let key = Fingerprint::from_request(&request).cache_key();
/// assert_eq!(key.as_str(), "http-cache-GET /items{color:red}{ACCEPT:application/json}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    method: Method,
    path: String,
    params: Params,
    // Upper-cased header name -> values in arrival order.
    headers: BTreeMap<String, Vec<String>>,
}

impl Fingerprint {
    /// Builds a fingerprint from its parts; `headers` may contain anything,
    /// only allow-listed names are kept.
    pub fn new(method: Method, path: impl Into<String>, params: Params, headers: &Headers) -> Self {
        let mut kept: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers.allowed(&ALLOWED_HEADERS).iter() {
            kept.entry(name.to_ascii_uppercase())
                .or_default()
                .push(value.to_owned());
        }

        Self {
            method,
            path: path.into(),
            params,
            headers: kept,
        }
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(
            request.method().clone(),
            request.path(),
            request.params().clone(),
            request.headers(),
        )
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Allow-listed headers, keyed by upper-cased name.
    pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.headers
    }

    /// The canonical rendering, without the namespace prefix.
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(32 + self.path.len());
        escape_into(&mut out, self.method.as_str());
        out.push(' ');
        escape_into(&mut out, &self.path);

        out.push('{');
        for (i, (key, value)) in self.params.encoded().enumerate() {
            if i > 0 {
                out.push(',');
            }
            escape_into(&mut out, key);
            out.push(':');
            match value {
                ParamValue::Single(v) => escape_into(&mut out, v),
                ParamValue::List(vs) => render_list(&mut out, vs),
            }
        }
        out.push('}');

        out.push('{');
        for (i, (name, values)) in self.headers.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            escape_into(&mut out, name);
            out.push(':');
            match values.as_slice() {
                [single] => escape_into(&mut out, single),
                many => render_list(&mut out, many),
            }
        }
        out.push('}');
        out
    }

    /// The namespaced store key for this fingerprint.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey(format!("{KEY_PREFIX}{}", self.canonical()))
    }
}

/// A rendered, namespaced cache key.
///
/// Inserted into the request [`Extensions`](crate::context::Extensions) by
/// [`HttpCache`](crate::cache::HttpCache) before the downstream handler runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn render_list(out: &mut String, values: &[String]) {
    out.push('[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        escape_into(out, v);
    }
    out.push(']');
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, '\\' | '{' | '}' | '[' | ']' | ':' | ',' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(req: Request) -> String {
        Fingerprint::from_request(&req).cache_key().into_string()
    }

    fn get(target: &str) -> crate::http::request::RequestBuilder {
        Request::builder(Method::Get, target)
    }

    #[test]
    fn documented_example() {
        let k = key(get("/items?color=red").header("Accept", "application/json").build());
        assert_eq!(k, "http-cache-GET /items{color:red}{ACCEPT:application/json}");
    }

    #[test]
    fn no_params_no_headers() {
        assert_eq!(key(get("/").build()), "http-cache-GET /{}{}");
    }

    #[test]
    fn equivalent_requests_share_a_key() {
        let a = get("/items?b=2&a=1")
            .header("accept", "text/html")
            .header("Authorization", "Bearer x")
            .build();
        let b = get("/items?a=1&b=2")
            .header("AUTHORIZATION", "Bearer x")
            .header("Accept", "text/html")
            .build();
        assert_eq!(key(a), key(b));
    }

    #[test]
    fn non_allowed_headers_are_ignored() {
        let plain = key(get("/items").build());
        let noisy = key(
            get("/items")
                .header("X-Request-Id", "abc")
                .header("User-Agent", "curl/8")
                .header("Cookie", "session=1")
                .build(),
        );
        assert_eq!(plain, noisy);
    }

    #[test]
    fn every_identity_field_changes_the_key() {
        let base = key(
            get("/items?color=red")
                .header("Accept", "application/json")
                .header("Content-Language", "en")
                .header("Authorization", "Bearer a")
                .build(),
        );
        let variants = [
            Request::builder(Method::Head, "/items?color=red")
                .header("Accept", "application/json")
                .header("Content-Language", "en")
                .header("Authorization", "Bearer a")
                .build(),
            get("/products?color=red")
                .header("Accept", "application/json")
                .header("Content-Language", "en")
                .header("Authorization", "Bearer a")
                .build(),
            get("/items?color=blue")
                .header("Accept", "application/json")
                .header("Content-Language", "en")
                .header("Authorization", "Bearer a")
                .build(),
            get("/items?color=red")
                .header("Accept", "text/html")
                .header("Content-Language", "en")
                .header("Authorization", "Bearer a")
                .build(),
            get("/items?color=red")
                .header("Accept", "application/json")
                .header("Content-Language", "de")
                .header("Authorization", "Bearer a")
                .build(),
            get("/items?color=red")
                .header("Accept", "application/json")
                .header("Content-Language", "en")
                .header("Authorization", "Bearer b")
                .build(),
        ];
        for variant in variants {
            assert_ne!(base, key(variant));
        }
    }

    #[test]
    fn separators_inside_values_cannot_collide() {
        // One param whose value looks like two params vs. two real params.
        let smuggled = key(get("/a?x=1%2Cy%3A2").build());
        let real = key(get("/a?x=1&y=2").build());
        assert_ne!(smuggled, real);

        // Path that looks like a parameter block.
        let in_path = key(get("/a{x:1}").build());
        let as_param = key(get("/a?x=1").build());
        assert_ne!(in_path, as_param);

        // Method/path boundary.
        let a = key(Request::builder(Method::from("GET /x"), "/y").build());
        let b = key(Request::builder(Method::Get, "/x /y").build());
        assert_ne!(a, b);
    }

    #[test]
    fn undecodable_params_do_not_collide() {
        assert_ne!(key(get("/a?k=%FF").build()), key(get("/a?k=%25FF").build()));
        assert_ne!(key(get("/a?%FF=1").build()), key(get("/a?%FE=1").build()));
        assert_eq!(key(get("/a?k=%FF").build()), "http-cache-GET /a{k:%FF}{}");
    }

    #[test]
    fn params_render_percent_encoded() {
        assert_eq!(
            key(get("/s?q=rust+lang&tag[]=a,b").build()),
            "http-cache-GET /s{q:rust%20lang,tag:[a%2Cb]}{}"
        );
        assert_eq!(key(get("/s?q=rust+lang").build()), key(get("/s?q=rust%20lang").build()));
    }

    #[test]
    fn single_value_and_list_differ() {
        assert_ne!(key(get("/a?t=x").build()), key(get("/a?t[]=x").build()));
        assert_ne!(key(get("/a?t=x,y").build()), key(get("/a?t=x&t=y").build()));
    }

    #[test]
    fn repeated_allowed_header_renders_as_list() {
        let k = key(
            get("/")
                .header("Accept", "text/html")
                .header("Accept", "application/json")
                .build(),
        );
        assert_eq!(k, "http-cache-GET /{}{ACCEPT:[text/html,application/json]}");
    }

    #[test]
    fn method_case_is_significant() {
        assert_ne!(
            key(get("/").build()),
            key(Request::builder(Method::from("get"), "/").build())
        );
    }
}
