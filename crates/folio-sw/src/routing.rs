//! Fetch routing.
//!
//! Decision procedure for every intercepted request:
//!
//! 1. Non-GET or non-http(s) requests pass through untouched.
//! 2. Document requests (destination `document`, or `Accept` containing
//!    `text/html`) go network-first: a successful same-origin 200 is copied
//!    into the cache; on network failure the cached copy is served, then the
//!    cached root document.
//! 3. Everything else goes cache-first: a hit never touches the network; a
//!    miss is fetched and cached when it is a basic 200; on network failure
//!    the cached root document is served.
//!
//! When no fallback exists the network error propagates to the caller.

use folio_net::{is_same_origin, Destination, Request, Response, ResponseType};
use http::{Method, StatusCode};
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey};
use crate::event::FetchEvent;
use crate::worker::ServiceWorker;
use crate::Result;

/// What the worker decided for a request.
#[derive(Debug, Clone)]
pub enum FetchDisposition {
    /// Not handled; the host performs the request as if no worker existed.
    PassThrough,
    /// Handled with this response.
    Respond(FetchResponse),
}

impl FetchDisposition {
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchDisposition::PassThrough => None,
            FetchDisposition::Respond(r) => Some(r),
        }
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// Exact cache match for the request.
    Cache,
    /// Cached root document served in place of the request.
    OfflineFallback,
}

/// A response delivered to the page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub fn from_cache(&self) -> bool {
        self.source != ResponseSource::Network
    }
}

/// Document requests are routed network-first.
pub fn is_document_request(request: &Request) -> bool {
    request.destination == Destination::Document || request.accepts_html()
}

impl ServiceWorker {
    /// Handle a fetch event.
    ///
    /// Cache writes are registered on the event; the host must
    /// [`settle`](FetchEvent::settle) it before dropping it.
    pub async fn handle_fetch(&self, event: &mut FetchEvent) -> Result<FetchDisposition> {
        let request = &event.request;

        if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
            debug!(url = %request.url, method = %request.method, "Passing through");
            return Ok(FetchDisposition::PassThrough);
        }

        let response = if is_document_request(request) {
            self.network_first(event).await?
        } else {
            self.cache_first(event).await?
        };
        Ok(FetchDisposition::Respond(response))
    }

    async fn network_first(&self, event: &mut FetchEvent) -> Result<FetchResponse> {
        let key = CacheKey::get(&event.request.url);

        match self.fetcher.fetch(&event.request).await {
            Ok(response) => {
                debug!(url = %event.request.url, status = %response.status, "Document from network");
                if self.is_cacheable(&event.request, &response) {
                    self.store(event, key, &response).await?;
                }
                Ok(FetchResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                debug!(url = %event.request.url, error = %e, "Document fetch failed, trying cache");
                if let Some(response) = self.cached(&key).await? {
                    return Ok(FetchResponse {
                        response,
                        source: ResponseSource::Cache,
                    });
                }
                self.offline_fallback().await?.ok_or(e.into())
            }
        }
    }

    async fn cache_first(&self, event: &mut FetchEvent) -> Result<FetchResponse> {
        let key = CacheKey::get(&event.request.url);

        if let Some(response) = self.cached(&key).await? {
            debug!(url = %event.request.url, "Asset from cache");
            return Ok(FetchResponse {
                response,
                source: ResponseSource::Cache,
            });
        }

        match self.fetcher.fetch(&event.request).await {
            Ok(response) => {
                if self.is_cacheable(&event.request, &response) {
                    self.store(event, key, &response).await?;
                } else {
                    debug!(
                        url = %event.request.url,
                        status = %response.status,
                        response_type = response.response_type.as_str(),
                        "Asset not cacheable"
                    );
                }
                Ok(FetchResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                debug!(url = %event.request.url, error = %e, "Asset fetch failed");
                self.offline_fallback().await?.ok_or(e.into())
            }
        }
    }

    /// Same-origin, status 200, basic.
    fn is_cacheable(&self, request: &Request, response: &Response) -> bool {
        response.status == StatusCode::OK
            && response.response_type == ResponseType::Basic
            && is_same_origin(&self.config.origin, &request.url)
            && is_same_origin(&self.config.origin, &response.url)
    }

    /// Write a copy of `response`. Under the swallow policy the write is
    /// fire-and-forget pending work on the event and its failure is only
    /// logged; otherwise it is awaited and its failure returned.
    async fn store(&self, event: &mut FetchEvent, key: CacheKey, response: &Response) -> Result<()> {
        let entry = CacheEntry::from_response(response);
        let name = self.cache_name().to_string();

        if self.config.swallow_cache_errors {
            let caches = self.caches();
            event.wait_until(async move {
                if let Err(e) = caches.write().await.put(&name, key.clone(), entry) {
                    warn!(cache = %name, key = %key, error = %e, "Cache write failed");
                }
            });
            Ok(())
        } else {
            self.caches.write().await.put(&name, key, entry)
        }
    }

    async fn cached(&self, key: &CacheKey) -> Result<Option<Response>> {
        let caches = self.caches.read().await;
        caches
            .match_in(self.cache_name(), key)
            .map(CacheEntry::to_response)
            .transpose()
    }

    async fn offline_fallback(&self) -> Result<Option<FetchResponse>> {
        let key = CacheKey::get(&self.config.fallback_url()?);
        let fallback = self.cached(&key).await?;
        if fallback.is_some() {
            debug!(fallback = %self.config.offline_fallback, "Serving offline fallback");
        }
        Ok(fallback.map(|response| FetchResponse {
            response,
            source: ResponseSource::OfflineFallback,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use folio_net::MockFetcher;
    use http::{header, HeaderValue};
    use std::sync::Arc;
    use url::Url;

    fn url(path: &str) -> Url {
        Url::parse("https://folio.example/").unwrap().join(path).unwrap()
    }

    fn worker(fetcher: Arc<MockFetcher>) -> ServiceWorker {
        let config = WorkerConfig::default()
            .with_origin(url("/"))
            .with_version("v1")
            .with_precache(["/index.html"]);
        ServiceWorker::new(config, fetcher)
    }

    #[test]
    fn test_document_classification() {
        assert!(is_document_request(&Request::navigate(url("/about.html"))));
        assert!(is_document_request(&Request::get(url("/partial")).header(
            header::ACCEPT,
            HeaderValue::from_static("text/html")
        )));
        assert!(!is_document_request(
            &Request::get(url("/app.js")).destination(Destination::Script)
        ));
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let fetcher = Arc::new(MockFetcher::new());
        let worker = worker(fetcher.clone());

        let mut event = FetchEvent::new(Request::post(url("/api/contact"), "x".into()));
        let disposition = worker.handle_fetch(&mut event).await.unwrap();

        assert!(matches!(disposition, FetchDisposition::PassThrough));
        assert_eq!(fetcher.call_count(), 0);
        assert_eq!(event.pending(), 0);
        assert!(worker.caches.read().await.keys().is_empty());
    }

    #[tokio::test]
    async fn test_non_http_scheme_passes_through() {
        let fetcher = Arc::new(MockFetcher::new());
        let worker = worker(fetcher.clone());

        let request = Request::get(Url::parse("chrome-extension://abc/script.js").unwrap());
        let disposition = worker.handle_fetch(&mut FetchEvent::new(request)).await.unwrap();

        assert!(matches!(disposition, FetchDisposition::PassThrough));
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_redirected_cross_origin_not_cached() {
        let fetcher = Arc::new(MockFetcher::new());
        let redirected = Response::basic(Url::parse("https://cdn.example/x.css").unwrap(), "x")
            .with_type(ResponseType::Cors);
        fetcher.respond(url("/x.css").as_str(), redirected);
        let worker = worker(fetcher);

        let mut event = FetchEvent::new(Request::get(url("/x.css")));
        let disposition = worker.handle_fetch(&mut event).await.unwrap();
        event.settle().await;

        assert_eq!(disposition.response().unwrap().source, ResponseSource::Network);
        assert!(worker.caches.read().await.get("v1").is_none());
    }

    #[tokio::test]
    async fn test_error_status_returned_but_not_cached() {
        let fetcher = Arc::new(MockFetcher::new());
        let worker = worker(fetcher.clone());

        let requests = [
            Request::get(url("/missing.css")).destination(Destination::Style),
            Request::navigate(url("/missing.html")),
        ];
        for request in requests {
            let mut event = FetchEvent::new(request);
            let disposition = worker.handle_fetch(&mut event).await.unwrap();
            event.settle().await;

            let delivered = disposition.response().unwrap();
            assert_eq!(delivered.source, ResponseSource::Network);
            assert_eq!(delivered.response.status, StatusCode::NOT_FOUND);
        }

        let server_error = Response::basic(url("/broken.js"), "oops")
            .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        fetcher.respond(url("/broken.js").as_str(), server_error);
        let mut event = FetchEvent::new(Request::get(url("/broken.js")));
        let disposition = worker.handle_fetch(&mut event).await.unwrap();
        event.settle().await;
        assert_eq!(
            disposition.response().unwrap().response.status,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        assert!(worker.caches.read().await.get("v1").is_none());
    }

    #[tokio::test]
    async fn test_offline_asset_without_fallback_propagates() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_offline(true);
        let worker = worker(fetcher);

        let request = Request::get(url("/app.js")).destination(Destination::Script);
        let err = worker
            .handle_fetch(&mut FetchEvent::new(request))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            crate::ServiceWorkerError::Network(folio_net::NetError::Offline(_))
        ));
    }

    #[tokio::test]
    async fn test_fragment_shares_cache_entry() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve(&url("/"), url("/app.js").as_str(), "app");
        let worker = worker(fetcher.clone());

        let mut first = FetchEvent::new(Request::get(url("/app.js")));
        worker.handle_fetch(&mut first).await.unwrap();
        first.settle().await;

        let mut second = FetchEvent::new(Request::get(url("/app.js#v")));
        let disposition = worker.handle_fetch(&mut second).await.unwrap();

        assert_eq!(disposition.response().unwrap().source, ResponseSource::Cache);
        assert_eq!(fetcher.call_count(), 1);
    }
}
