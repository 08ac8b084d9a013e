//! `reqwest`-backed fetcher for the live site.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::{classify, Fetcher, NetError, Request, Response};

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout. This is the only timeout layer.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("FolioWorker/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches over HTTP and classifies responses relative to the site origin.
pub struct HttpFetcher {
    client: Client,
    origin: Url,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher for pages served from `origin`.
    pub fn new(origin: Url, config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %origin, "HttpFetcher initialized");

        Ok(Self {
            client,
            origin,
            timeout: config.timeout,
        })
    }

    /// Site origin responses are classified against.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn map_error(&self, e: reqwest::Error) -> NetError {
        if e.is_timeout() {
            NetError::Timeout(self.timeout)
        } else if e.is_connect() {
            NetError::Offline(e.to_string())
        } else {
            NetError::RequestFailed(e.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = classify(&self.origin, &url, &headers);
        let redirected = url != request.url;

        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        trace!(
            url = %url,
            status = %status,
            response_type = response_type.as_str(),
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
            response_type,
            redirected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseType;
    use http::StatusCode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("FolioWorker/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_same_origin_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>home</h1>"))
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(origin.clone(), LoaderConfig::default()).unwrap();

        let request = Request::get(origin.join("/index.html").unwrap());
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert!(!response.redirected);
        assert_eq!(response.text().unwrap(), "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_fetch_other_origin_is_opaque() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("lib"))
            .mount(&server)
            .await;

        let site = Url::parse("https://folio.example/").unwrap();
        let fetcher = HttpFetcher::new(site, LoaderConfig::default()).unwrap();

        let cdn = Url::parse(&server.uri()).unwrap().join("/lib.js").unwrap();
        let response = fetcher.fetch(&Request::get(cdn)).await.unwrap();

        assert_eq!(response.response_type, ResponseType::Opaque);
    }

    #[tokio::test]
    async fn test_fetch_forwards_headers_and_keeps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contact"))
            .and(header("idempotency-key", "abc"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(origin.clone(), LoaderConfig::default()).unwrap();

        let request = Request::post(origin.join("/contact").unwrap(), "hi".into()).header(
            http::HeaderName::from_static("idempotency-key"),
            http::HeaderValue::from_static("abc"),
        );
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_timeout_reports_configured_duration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.html"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let config = LoaderConfig {
            timeout: Duration::from_millis(100),
            ..LoaderConfig::default()
        };
        let fetcher = HttpFetcher::new(origin.clone(), config).unwrap();

        let err = fetcher
            .fetch(&Request::get(origin.join("/slow.html").unwrap()))
            .await
            .unwrap_err();

        assert!(matches!(err, NetError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_is_error() {
        let origin = Url::parse("http://127.0.0.1:9/").unwrap();
        let fetcher = HttpFetcher::new(origin.clone(), LoaderConfig::default()).unwrap();

        let result = fetcher.fetch(&Request::get(origin)).await;
        assert!(result.is_err());
    }
}
