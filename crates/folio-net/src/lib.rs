//! # Folio Net
//!
//! Request/response model and network access for the Folio offline worker.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped types**: requests carry a destination, responses carry a
//!    response type (`basic`, `cors`, `opaque`, ...) the way page fetches do
//! 2. **Pluggable network**: the worker only sees the [`Fetcher`] trait, so
//!    tests can script the network and go offline on demand
//! 3. **Async HTTP**: [`HttpFetcher`] is backed by `reqwest`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

mod client;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::{HttpFetcher, LoaderConfig};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockFetcher;

/// Errors that can occur in networking.
#[derive(Error, Debug, Clone)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the page intends to do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Top-level navigation.
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR and anything unclassified.
    #[default]
    Empty,
}

impl Destination {
    /// Parse a `Sec-Fetch-Dest` style token.
    pub fn from_token(token: &str) -> Self {
        match token {
            "document" => Self::Document,
            "script" => Self::Script,
            "style" => Self::Style,
            "image" => Self::Image,
            "font" => Self::Font,
            "manifest" => Self::Manifest,
            _ => Self::Empty,
        }
    }
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub destination: Destination,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            destination: Destination::Empty,
            body: None,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .destination(Destination::Document)
            .header(header::ACCEPT, HeaderValue::from_static("text/html,*/*;q=0.8"))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Whether the `Accept` header asks for HTML.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }
}

/// How a response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Same-origin response.
    Basic,
    /// Cross-origin response readable through CORS.
    Cors,
    /// Cross-origin response without CORS; body and status are hidden.
    Opaque,
    /// Redirect captured with `redirect: manual`.
    OpaqueRedirect,
    /// Network error placeholder.
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Cors => "cors",
            Self::Opaque => "opaque",
            Self::OpaqueRedirect => "opaqueredirect",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "basic" => Self::Basic,
            "cors" => Self::Cors,
            "opaque" => Self::Opaque,
            "opaqueredirect" => Self::OpaqueRedirect,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// The final URL differs from the requested one.
    pub redirected: bool,
}

impl Response {
    /// Build a same-origin 200 response.
    pub fn basic(url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            redirected: false,
        }
    }

    /// Set the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Classify a response the way a page fetch would, relative to `origin`.
pub fn classify(origin: &Url, final_url: &Url, headers: &HeaderMap) -> ResponseType {
    if is_same_origin(origin, final_url) {
        ResponseType::Basic
    } else if headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
        ResponseType::Cors
    } else {
        ResponseType::Opaque
    }
}

/// Scheme, host and port all match.
pub fn is_same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Network access as seen by the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Only transport failures are errors; HTTP error
    /// statuses come back as responses.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/app.js").unwrap();
        let request = Request::get(url.clone())
            .destination(Destination::Script)
            .header(header::ACCEPT, HeaderValue::from_static("*/*"));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.destination, Destination::Script);
        assert!(!request.accepts_html());
    }

    #[test]
    fn test_navigate_accepts_html() {
        let request = Request::navigate(Url::parse("https://example.com/").unwrap());
        assert_eq!(request.destination, Destination::Document);
        assert!(request.accepts_html());
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_destination_tokens() {
        assert_eq!(Destination::from_token("document"), Destination::Document);
        assert_eq!(Destination::from_token("style"), Destination::Style);
        assert_eq!(Destination::from_token("video"), Destination::Empty);
    }

    #[test]
    fn test_classify() {
        let origin = Url::parse("https://folio.example/").unwrap();
        let same = Url::parse("https://folio.example/styles.min.css").unwrap();
        let cdn = Url::parse("https://cdn.example/lib.js").unwrap();

        let mut cors_headers = HeaderMap::new();
        cors_headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );

        assert_eq!(classify(&origin, &same, &HeaderMap::new()), ResponseType::Basic);
        assert_eq!(classify(&origin, &cdn, &cors_headers), ResponseType::Cors);
        assert_eq!(classify(&origin, &cdn, &HeaderMap::new()), ResponseType::Opaque);
    }

    #[test]
    fn test_same_origin_respects_port_and_scheme() {
        let a = Url::parse("https://folio.example/").unwrap();
        assert!(!is_same_origin(&a, &Url::parse("http://folio.example/").unwrap()));
        assert!(!is_same_origin(&a, &Url::parse("https://folio.example:8443/").unwrap()));
        assert!(is_same_origin(&a, &Url::parse("https://folio.example/a/b?c").unwrap()));
    }
}
