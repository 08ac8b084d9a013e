//! In-memory fetcher with scripted responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use http::StatusCode;
use url::Url;

use crate::{Fetcher, NetError, Request, Response, ResponseType};

/// Scripted network: routes are keyed by absolute URL, unknown URLs get a
/// 404, and the whole network can be switched offline.
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Result<Response, NetError>>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`, typed by its origin against
    /// `origin` (same origin is basic, else opaque).
    pub fn serve(&self, origin: &Url, url: &str, body: &str) -> &Self {
        let url = Url::parse(url).expect("mock url");
        let response_type = if crate::is_same_origin(origin, &url) {
            ResponseType::Basic
        } else {
            ResponseType::Opaque
        };
        let response = Response::basic(url.clone(), body.to_string()).with_type(response_type);
        self.respond(url.as_str(), response)
    }

    /// Serve a prepared response at `url`.
    pub fn respond(&self, url: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(response));
        self
    }

    /// Fail requests for `url` with a network error.
    pub fn fail(&self, url: &str) -> &Self {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Err(NetError::RequestFailed(format!("scripted failure: {url}"))),
        );
        self
    }

    /// Toggle the whole network.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches attempted, including offline ones.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of fetches attempted for `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.to_string());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline(request.url.to_string()));
        }

        let routes = self.routes.lock().unwrap();
        match routes.get(request.url.as_str()) {
            Some(route) => route.clone(),
            None => Ok(Response::basic(request.url.clone(), "not found")
                .with_status(StatusCode::NOT_FOUND)),
        }
    }
}
