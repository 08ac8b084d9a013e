//! Install and activate.

use folio_net::Request;
use futures::future::try_join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheKey};
use crate::worker::ServiceWorker;
use crate::{Result, ServiceWorkerError};

/// Outcome of the install event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Entries written by precaching.
    pub cached: usize,
    /// Precache failure that was swallowed, if any.
    pub swallowed_error: Option<String>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.swallowed_error.is_none()
    }
}

/// Outcome of the activate event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale namespaces deleted.
    pub deleted: Vec<String>,
    /// Ids of clients whose controller changed to this worker.
    pub claimed: Vec<String>,
}

impl ServiceWorker {
    /// Handle the install event: precache the manifest into this version's
    /// namespace, then ask to skip waiting unless configured not to.
    pub async fn install(&self) -> Result<InstallReport> {
        let name = self.cache_name().to_string();
        info!(worker = %self.id, cache = %name, "Installing");

        self.caches.write().await.open(&name);

        let report = match self.precache(&name).await {
            Ok(cached) => {
                info!(cache = %name, cached, "Precache complete");
                InstallReport {
                    cached,
                    swallowed_error: None,
                }
            }
            Err(e) if self.config.swallow_cache_errors => {
                warn!(cache = %name, error = %e, "Precache failed, installing anyway");
                InstallReport {
                    cached: 0,
                    swallowed_error: Some(e.to_string()),
                }
            }
            Err(e) => return Err(e),
        };

        if self.config.skip_waiting_on_install {
            self.skip_waiting();
        }
        Ok(report)
    }

    /// Fetch every manifest asset, then store all of them or none.
    async fn precache(&self, name: &str) -> Result<usize> {
        let urls = self.config.precache_urls()?;
        let fetches = urls.into_iter().map(|url| self.fetch_for_precache(url));
        let entries = try_join_all(fetches).await?;

        let count = entries.len();
        self.caches.write().await.put_all(name, entries)?;
        Ok(count)
    }

    async fn fetch_for_precache(&self, url: Url) -> Result<(CacheKey, CacheEntry)> {
        let request = Request::get(url);
        let response = self.fetcher.fetch(&request).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed(format!(
                "{} returned {}",
                request.url, response.status
            )));
        }
        debug!(url = %request.url, bytes = response.body.len(), "Precached");
        Ok((CacheKey::get(&request.url), CacheEntry::from_response(&response)))
    }

    /// Handle the activate event: delete every namespace but this version's,
    /// then claim all open clients.
    pub async fn activate(&self) -> Result<ActivateReport> {
        let name = self.cache_name();

        let deleted = {
            let mut caches = self.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|existing| existing != name)
                .collect();
            for old in &stale {
                caches.delete(old);
                info!(cache = %old, "Deleted stale cache");
            }
            stale
        };

        let claimed = self
            .clients
            .write()
            .await
            .claim(self.id, &self.config.origin);

        info!(worker = %self.id, cache = %name, claimed = claimed.len(), "Activated");
        Ok(ActivateReport { deleted, claimed })
    }
}
