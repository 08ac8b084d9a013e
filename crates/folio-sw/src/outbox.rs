//! Deferred submissions replayed on background sync.
//!
//! Each submission carries a UUID idempotency key, sent as the
//! `Idempotency-Key` header on every attempt, so the server can drop
//! duplicates when a replay races a late original.

use std::collections::VecDeque;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use folio_net::{Fetcher, Request};
use http::{header, HeaderName, HeaderValue};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::handlers::SyncReport;

const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// A POST waiting for connectivity.
#[derive(Debug, Clone)]
pub struct Submission {
    pub key: Uuid,
    pub url: Url,
    pub content_type: String,
    pub body: Bytes,
    pub queued_at: DateTime<Utc>,
    /// Failed replay attempts so far.
    pub attempts: u32,
}

impl Submission {
    fn to_request(&self) -> Request {
        let mut request = Request::post(self.url.clone(), self.body.clone());
        if let Ok(key) = HeaderValue::try_from(self.key.to_string()) {
            request
                .headers
                .insert(HeaderName::from_static(IDEMPOTENCY_KEY), key);
        }
        if let Ok(ct) = HeaderValue::try_from(self.content_type.as_str()) {
            request.headers.insert(header::CONTENT_TYPE, ct);
        }
        request
    }
}

/// FIFO queue of deferred submissions.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Submission>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a submission, returning its idempotency key.
    pub fn enqueue(&mut self, url: Url, content_type: impl Into<String>, body: Bytes) -> Uuid {
        let key = Uuid::new_v4();
        self.queue.push_back(Submission {
            key,
            url,
            content_type: content_type.into(),
            body,
            queued_at: Utc::now(),
            attempts: 0,
        });
        debug!(key = %key, queued = self.queue.len(), "Submission deferred");
        key
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Submission> {
        self.queue.iter()
    }

    pub(crate) fn snapshot(&self) -> Vec<Submission> {
        self.queue.iter().cloned().collect()
    }

    /// Drop delivered submissions and bump attempts on the rest.
    pub(crate) fn settle(&mut self, delivered: &[Uuid], failed: &[Uuid]) {
        self.queue.retain(|s| !delivered.contains(&s.key));
        for submission in self.queue.iter_mut() {
            if failed.contains(&submission.key) {
                submission.attempts += 1;
            }
        }
    }
}

/// Send every submission once. Returns the delivered and failed keys.
pub(crate) async fn replay(
    submissions: &[Submission],
    fetcher: &dyn Fetcher,
) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut delivered = Vec::new();
    let mut failed = Vec::new();

    for submission in submissions {
        match fetcher.fetch(&submission.to_request()).await {
            Ok(response) if response.ok() => {
                debug!(key = %submission.key, status = %response.status, "Submission delivered");
                delivered.push(submission.key);
            }
            Ok(response) => {
                warn!(key = %submission.key, status = %response.status, "Submission rejected, keeping it queued");
                failed.push(submission.key);
            }
            Err(e) => {
                warn!(key = %submission.key, error = %e, "Submission failed, keeping it queued");
                failed.push(submission.key);
            }
        }
    }

    (delivered, failed)
}

impl SyncReport {
    pub(crate) fn from_outcome(delivered: &[Uuid], failed: &[Uuid], remaining: usize) -> Self {
        Self {
            sent: delivered.len(),
            retained: failed.len(),
            remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_net::{MockFetcher, Response};
    use http::StatusCode;

    fn contact_url() -> Url {
        Url::parse("https://folio.example/api/contact").unwrap()
    }

    #[test]
    fn test_enqueue_assigns_unique_keys() {
        let mut outbox = Outbox::new();
        let a = outbox.enqueue(contact_url(), "application/json", Bytes::from_static(b"{}"));
        let b = outbox.enqueue(contact_url(), "application/json", Bytes::from_static(b"{}"));

        assert_ne!(a, b);
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.pending().next().unwrap().key, a);
    }

    #[test]
    fn test_request_carries_key_and_type() {
        let mut outbox = Outbox::new();
        let key = outbox.enqueue(contact_url(), "application/json", Bytes::from_static(b"{}"));
        let request = outbox.pending().next().unwrap().to_request();

        assert_eq!(request.method, http::Method::POST);
        assert_eq!(request.headers[IDEMPOTENCY_KEY], key.to_string().as_str());
        assert_eq!(request.headers[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_replay_keeps_failures() {
        let mut outbox = Outbox::new();
        let ok_url = contact_url();
        let bad_url = Url::parse("https://folio.example/api/newsletter").unwrap();
        outbox.enqueue(ok_url.clone(), "text/plain", Bytes::from_static(b"hello"));
        outbox.enqueue(bad_url.clone(), "text/plain", Bytes::from_static(b"sub"));

        let fetcher = MockFetcher::new();
        fetcher.respond(ok_url.as_str(), Response::basic(ok_url.clone(), ""));
        fetcher.respond(
            bad_url.as_str(),
            Response::basic(bad_url.clone(), "").with_status(StatusCode::BAD_GATEWAY),
        );

        let (delivered, failed) = replay(&outbox.snapshot(), &fetcher).await;
        outbox.settle(&delivered, &failed);

        assert_eq!(delivered.len(), 1);
        assert_eq!(failed.len(), 1);
        assert_eq!(outbox.len(), 1);
        let left = outbox.pending().next().unwrap();
        assert_eq!(left.url, bad_url);
        assert_eq!(left.attempts, 1);
    }
}
