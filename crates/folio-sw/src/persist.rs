//! Cache storage snapshots on disk.
//!
//! Storage outlives worker instances in memory; a snapshot lets it outlive
//! the process too. Bodies are stored base64-encoded in a single JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{Cache, CacheStorage};
use crate::{Result, ServiceWorkerError};

const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheStorageSnapshot {
    format: u32,
    saved_at: chrono::DateTime<chrono::Utc>,
    caches: Vec<Cache>,
}

impl CacheStorage {
    /// Write every namespace to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut caches: Vec<Cache> = self.caches().cloned().collect();
        caches.sort_by(|a, b| a.name.cmp(&b.name));

        let snapshot = CacheStorageSnapshot {
            format: SNAPSHOT_FORMAT,
            saved_at: chrono::Utc::now(),
            caches,
        };
        let data = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        }
        std::fs::write(path, data)
            .map_err(|e| ServiceWorkerError::Persistence(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), caches = snapshot.caches.len(), "Cache storage saved");
        Ok(())
    }

    /// Restore storage from `path`. A missing file yields empty storage.
    pub fn load(path: &Path, quota_bytes: Option<u64>) -> Result<Self> {
        let mut storage = match quota_bytes {
            Some(quota) => CacheStorage::with_quota(quota),
            None => CacheStorage::new(),
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot, starting empty");
                return Ok(storage);
            }
            Err(e) => {
                return Err(ServiceWorkerError::Persistence(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let snapshot: CacheStorageSnapshot = serde_json::from_str(&contents)
            .map_err(|e| ServiceWorkerError::Persistence(e.to_string()))?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(ServiceWorkerError::Persistence(format!(
                "unsupported snapshot format {}",
                snapshot.format
            )));
        }

        for cache in snapshot.caches {
            storage.insert_cache(cache);
        }
        info!(path = %path.display(), caches = storage.keys().len(), "Cache storage restored");
        Ok(storage)
    }
}
