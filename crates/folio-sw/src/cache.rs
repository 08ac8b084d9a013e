//! Versioned cache storage.
//!
//! A [`CacheStorage`] holds one [`Cache`] per deployment version. Entries are
//! keyed by the normalized request (method + URL without fragment) and hold a
//! full response snapshot. Storage is shared between worker instances and
//! outlives them.

use std::sync::Arc;

use bytes::Bytes;
use folio_net::{Request, Response, ResponseType};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Cache storage shared by every worker of the site.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

// ==================== Key ====================

/// Normalized request identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!("GET {url}"))
    }

    /// Key for a request; `None` when the method is not cacheable.
    pub fn for_request(request: &Request) -> Option<Self> {
        (request.method == Method::GET).then(|| Self::get(&request.url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ==================== Entry ====================

/// A cached response snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Final response URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeated names allowed.
    pub headers: Vec<(String, String)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// `basic`, `cors`, ...
    pub response_type: String,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CacheEntry {
    /// Snapshot a response.
    pub fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: response.body.to_vec(),
            response_type: response.response_type.as_str().to_string(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Result<Response> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Ok(Response {
            url,
            status,
            headers,
            body: Bytes::from(self.body.clone()),
            response_type: ResponseType::parse(&self.response_type).unwrap_or(ResponseType::Basic),
            redirected: false,
        })
    }

    /// Body bytes counted against the quota.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// One cache namespace.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&CacheKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn size(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

// ==================== Cache Storage ====================

/// All cache namespaces of the site.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,

    /// Maximum total body bytes; `None` is unlimited.
    quota_bytes: Option<u64>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage limited to `quota_bytes` of response bodies.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Wrap for sharing between workers.
    pub fn shared(self) -> SharedCacheStorage {
        Arc::new(RwLock::new(self))
    }

    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_bytes
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &Cache {
        self.caches.entry(name.to_string()).or_insert_with(|| {
            debug!(cache = name, "Cache created");
            Cache::new(name)
        })
    }

    /// Look up a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Match within one namespace.
    pub fn match_in(&self, name: &str, key: &CacheKey) -> Option<&CacheEntry> {
        self.caches.get(name)?.match_request(key)
    }

    /// Total body bytes across every namespace.
    pub fn usage(&self) -> u64 {
        self.caches.values().map(Cache::size).sum()
    }

    /// Store one entry, creating the namespace if needed. Overwrites any
    /// existing entry for the key.
    pub fn put(&mut self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<()> {
        let replaced = self
            .match_in(name, &key)
            .map(CacheEntry::size)
            .unwrap_or(0);
        self.check_quota(entry.size(), replaced)?;

        trace!(cache = name, key = %key, bytes = entry.size(), "Cache put");
        self.cache_mut(name).entries.insert(key, entry);
        Ok(())
    }

    /// Store every entry or none of them.
    /// A key repeated in the batch is stored once, last one wins.
    pub fn put_all(&mut self, name: &str, entries: Vec<(CacheKey, CacheEntry)>) -> Result<()> {
        let entries: HashMap<CacheKey, CacheEntry> = entries.into_iter().collect();
        let incoming: u64 = entries.values().map(CacheEntry::size).sum();
        let replaced: u64 = entries
            .keys()
            .filter_map(|k| self.match_in(name, k))
            .map(CacheEntry::size)
            .sum();
        self.check_quota(incoming, replaced)?;

        let cache = self.cache_mut(name);
        for (key, entry) in entries {
            cache.entries.insert(key, entry);
        }
        Ok(())
    }

    /// Delete one entry.
    pub fn delete_entry(&mut self, name: &str, key: &CacheKey) -> bool {
        self.caches
            .get_mut(name)
            .map(|cache| cache.delete(key))
            .unwrap_or(false)
    }

    pub(crate) fn insert_cache(&mut self, cache: Cache) {
        self.caches.insert(cache.name.clone(), cache);
    }

    pub(crate) fn caches(&self) -> impl Iterator<Item = &Cache> {
        self.caches.values()
    }

    fn cache_mut(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    fn check_quota(&self, incoming: u64, replaced: u64) -> Result<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let used = self.usage().saturating_sub(replaced);
        let available = quota.saturating_sub(used);
        if incoming > available {
            return Err(ServiceWorkerError::QuotaExceeded {
                needed: incoming,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &str) -> (CacheKey, CacheEntry) {
        let url = Url::parse(url).unwrap();
        let response = Response::basic(url.clone(), body.to_string());
        (CacheKey::get(&url), CacheEntry::from_response(&response))
    }

    #[test]
    fn test_key_normalization() {
        let a = Url::parse("https://folio.example/about.html#team").unwrap();
        let b = Url::parse("https://folio.example/about.html").unwrap();
        assert_eq!(CacheKey::get(&a), CacheKey::get(&b));
        assert_eq!(CacheKey::get(&b).as_str(), "GET https://folio.example/about.html");

        let post = Request::post(b, Bytes::from_static(b"x"));
        assert!(CacheKey::for_request(&post).is_none());
    }

    #[test]
    fn test_cache() {
        let mut storage = CacheStorage::new();
        let (key, e) = entry("https://folio.example/style.css", "body{}");

        storage.put("v1", key.clone(), e).unwrap();

        assert!(storage.match_in("v1", &key).is_some());
        assert!(storage.match_in("v2", &key).is_none());
        let (other, _) = entry("https://folio.example/other.css", "");
        assert!(storage.match_in("v1", &other).is_none());
    }

    #[test]
    fn test_cache_delete() {
        let mut storage = CacheStorage::new();
        let (key, e) = entry("https://folio.example/style.css", "body{}");
        storage.put("v1", key.clone(), e).unwrap();

        assert!(storage.delete_entry("v1", &key));
        assert!(storage.match_in("v1", &key).is_none());
        assert!(!storage.delete_entry("v9", &key));
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));
        assert!(storage.get("v1").unwrap().is_empty());

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_last_writer_wins() {
        let mut storage = CacheStorage::new();
        let (key, first) = entry("https://folio.example/a.js", "one");
        let (_, second) = entry("https://folio.example/a.js", "two");

        storage.put("v1", key.clone(), first).unwrap();
        storage.put("v1", key.clone(), second).unwrap();

        assert_eq!(storage.match_in("v1", &key).unwrap().body, b"two");
        assert_eq!(storage.get("v1").unwrap().len(), 1);
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let mut storage = CacheStorage::with_quota(10);
        let (a, small) = entry("https://folio.example/a.js", "12345678");
        let (b, big) = entry("https://folio.example/b.js", "12345");

        storage.put("v1", a.clone(), small).unwrap();
        let err = storage.put("v1", b.clone(), big).unwrap_err();

        assert!(matches!(
            err,
            ServiceWorkerError::QuotaExceeded { needed: 5, available: 2 }
        ));
        assert!(storage.match_in("v1", &b).is_none());
        assert_eq!(storage.usage(), 8);

        // Overwriting frees the old body first.
        let (_, replacement) = entry("https://folio.example/a.js", "1234567890");
        storage.put("v1", a, replacement).unwrap();
        assert_eq!(storage.usage(), 10);
    }

    #[test]
    fn test_put_all_is_atomic() {
        let mut storage = CacheStorage::with_quota(6);
        let batch = vec![
            entry("https://folio.example/a.js", "aaa"),
            entry("https://folio.example/b.js", "bbbb"),
        ];

        assert!(storage.put_all("v1", batch).is_err());
        assert!(storage.get("v1").map(Cache::is_empty).unwrap_or(true));

        let batch = vec![
            entry("https://folio.example/a.js", "aaa"),
            entry("https://folio.example/b.js", "bbb"),
        ];
        storage.put_all("v1", batch).unwrap();
        assert_eq!(storage.get("v1").unwrap().len(), 2);
    }

    #[test]
    fn test_put_all_counts_repeated_key_once() {
        let mut storage = CacheStorage::with_quota(5);
        let batch = vec![
            entry("https://folio.example/a.js", "first"),
            entry("https://folio.example/a.js", "later"),
        ];

        storage.put_all("v1", batch).unwrap();

        let key = CacheKey::get(&Url::parse("https://folio.example/a.js").unwrap());
        assert_eq!(storage.match_in("v1", &key).unwrap().body, b"later".to_vec());
        assert_eq!(storage.usage(), 5);
    }

    #[test]
    fn test_entry_restores_response() {
        let url = Url::parse("https://folio.example/index.html").unwrap();
        let response = Response::basic(url.clone(), "<html>")
            .with_header(http::header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        let restored = CacheEntry::from_response(&response).to_response().unwrap();

        assert_eq!(restored.url, url);
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.response_type, ResponseType::Basic);
        assert_eq!(restored.headers[http::header::CONTENT_TYPE], "text/html");
        assert_eq!(restored.body, Bytes::from_static(b"<html>"));
    }

    #[test]
    fn test_cache_keys() {
        let mut storage = CacheStorage::new();
        let (a, ea) = entry("https://folio.example/a.js", "");
        let (b, eb) = entry("https://folio.example/b.js", "");
        storage.put("test", a, ea).unwrap();
        storage.put("test", b, eb).unwrap();

        assert_eq!(storage.get("test").unwrap().keys().len(), 2);
        assert_eq!(storage.keys(), vec!["test".to_string()]);
    }
}
