//! Inbound requests: wire parsing via [`httparse`] and a programmatic builder.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method, Params};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("header `{name}` is not valid UTF-8")]
    InvalidHeader { name: String },
}

/// A fully parsed HTTP/1.1 request.
///
/// [`params`](Self::params) is the merged parameter view used for cache
/// fingerprinting: query-string parameters first, then url-encoded form body
/// parameters for any key the query did not set.
///
/// # Examples
///
/// ```
/// use readthrough::http::Request;
///
/// let raw = b"GET /items?color=red HTTP/1.1\r\nAccept: application/json\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/items");
/// assert_eq!(request.query_param("color"), Some("red"));
/// assert_eq!(request.headers().get("accept"), Some("application/json"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    params: Params,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body
    /// begins. The body is taken from the bytes after that offset, bounded by
    /// `Content-Length` (absent means no body).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the header block is not complete yet.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path, or version is absent.
    /// - [`RequestError::InvalidHeader`]: a header value is not UTF-8.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = Method::from(
            raw_req
                .method
                .ok_or(RequestError::MissingField { field: "method" })?,
        );
        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(|_| {
                RequestError::InvalidHeader {
                    name: header.name.to_owned(),
                }
            })?;
            header_map.insert(header.name, value);
        }

        let declared = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body_end = body_offset.saturating_add(declared).min(buf.len());
        let body = Bytes::copy_from_slice(&buf[body_offset..body_end]);

        Ok((
            Self::from_parts(method, target, version, header_map, body),
            body_offset,
        ))
    }

    /// Starts building a request for `target` (path plus optional `?query`).
    ///
    /// # Examples
    ///
    /// ```
    /// use readthrough::http::{Method, Request};
    ///
    /// let request = Request::builder(Method::Get, "/items?color=red")
    ///     .header("Accept", "application/json")
    ///     .build();
    /// assert_eq!(request.params().get_str("color"), Some("red"));
    /// ```
    pub fn builder(method: impl Into<Method>, target: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method: method.into(),
            target: target.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    fn from_parts(method: Method, target: &str, version: u8, headers: Headers, body: Bytes) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };

        let mut params = query
            .as_deref()
            .map(Params::parse_urlencoded)
            .unwrap_or_default();

        let is_form = headers
            .get("content-type")
            .is_some_and(|ct| ct.trim_start().starts_with(FORM_CONTENT_TYPE));
        if is_form && !body.is_empty() {
            if let Ok(text) = std::str::from_utf8(&body) {
                params.merge_missing(Params::parse_urlencoded(text));
            }
        }

        Self {
            method,
            path,
            version,
            headers,
            query,
            body,
            params,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Merged query and form parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// First value of a parameter by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get_str(key)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// `Content-Length` parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

/// Builder returned by [`Request::builder`]. Always produces HTTP/1.1.
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    target: String,
    headers: Headers,
    body: Bytes,
}

impl RequestBuilder {
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Request {
        Request::from_parts(self.method, &self.target, 1, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ParamValue;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert!(req.params().is_empty());
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn query_params_are_decoded() {
        let raw = b"GET /search?q=rust+lang&tag[]=a&tag[]=b HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust+lang&tag[]=a&tag[]=b"));
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(
            req.params().get("tag"),
            Some(&ParamValue::List(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_is_bounded_by_content_length() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\n";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(req.body().as_ref(), b"hello");
        assert_eq!(&raw[body_offset..body_offset + 5], b"hello");
    }

    #[test]
    fn oversized_content_length_does_not_overflow() {
        let raw = format!("GET / HTTP/1.1\r\nContent-Length: {}\r\n\r\npartial", usize::MAX);
        let (req, body_offset) = Request::parse(raw.as_bytes()).unwrap();
        assert_eq!(req.content_length(), Some(usize::MAX));
        assert_eq!(req.body().as_ref(), b"partial");
        assert_eq!(body_offset, raw.len() - 7);
    }

    #[test]
    fn non_utf8_header_value_is_rejected() {
        let raw = b"GET / HTTP/1.1\r\nAccept: text/\xFFhtml\r\n\r\n";
        match Request::parse(raw) {
            Err(RequestError::InvalidHeader { name }) => assert_eq!(name, "Accept"),
            other => panic!("expected InvalidHeader, got {other:?}"),
        }
    }

    #[test]
    fn form_body_merges_into_params() {
        let raw = b"POST /items?page=1 HTTP/1.1\r\n\
            Content-Type: application/x-www-form-urlencoded\r\n\
            Content-Length: 20\r\n\r\n\
            color=blue&page=9&x=";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("color"), Some("blue"));
        assert_eq!(req.query_param("page"), Some("1"));
        assert_eq!(req.query_param("x"), Some(""));
    }

    #[test]
    fn non_form_body_is_ignored_for_params() {
        let req = Request::builder(Method::Post, "/items")
            .header("Content-Type", "application/json")
            .body(r#"{"color":"red"}"#)
            .build();
        assert!(req.params().is_empty());
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }
}
