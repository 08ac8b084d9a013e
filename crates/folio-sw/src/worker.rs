//! The worker instance and its collaborators.
//!
//! Event handling is split by concern: `lifecycle` (install / activate),
//! `routing` (fetch) and `handlers` (message / push / sync) each add an
//! `impl ServiceWorker` block.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use folio_net::Fetcher;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::{CacheStorage, SharedCacheStorage};
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::notify::{NotificationSink, TracingNotifier};
use crate::outbox::Outbox;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// One deployed version of the worker.
///
/// The worker owns no cache data itself: storage, clients and the outbox
/// are shared handles that outlive it.
pub struct ServiceWorker {
    pub(crate) id: ServiceWorkerId,
    pub(crate) config: Arc<WorkerConfig>,
    pub(crate) caches: SharedCacheStorage,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) clients: Arc<RwLock<Clients>>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) outbox: Arc<RwLock<Outbox>>,
    skip_waiting: AtomicBool,
    push_count: AtomicU64,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("cache_version", &self.config.cache_version)
            .field("skip_waiting", &self.skip_waiting_requested())
            .finish()
    }
}

impl ServiceWorker {
    /// Worker with private storage, clients and outbox.
    pub fn new(config: WorkerConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::builder(config, fetcher).build()
    }

    pub fn builder(config: WorkerConfig, fetcher: Arc<dyn Fetcher>) -> ServiceWorkerBuilder {
        ServiceWorkerBuilder {
            config,
            fetcher,
            caches: None,
            clients: None,
            notifier: None,
            outbox: None,
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Name of the cache namespace this worker reads and writes.
    pub fn cache_name(&self) -> &str {
        &self.config.cache_version
    }

    pub fn caches(&self) -> SharedCacheStorage {
        Arc::clone(&self.caches)
    }

    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    pub fn outbox(&self) -> Arc<RwLock<Outbox>> {
        Arc::clone(&self.outbox)
    }

    /// Ask to be promoted without waiting for open pages to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn next_push_key(&self) -> u64 {
        self.push_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Builder for [`ServiceWorker`]; unset handles get fresh private instances.
pub struct ServiceWorkerBuilder {
    config: WorkerConfig,
    fetcher: Arc<dyn Fetcher>,
    caches: Option<SharedCacheStorage>,
    clients: Option<Arc<RwLock<Clients>>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    outbox: Option<Arc<RwLock<Outbox>>>,
}

impl ServiceWorkerBuilder {
    pub fn caches(mut self, caches: SharedCacheStorage) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn clients(mut self, clients: Arc<RwLock<Clients>>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn outbox(mut self, outbox: Arc<RwLock<Outbox>>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn build(self) -> ServiceWorker {
        ServiceWorker {
            id: ServiceWorkerId::new(),
            config: Arc::new(self.config),
            caches: self
                .caches
                .unwrap_or_else(|| CacheStorage::new().shared()),
            fetcher: self.fetcher,
            clients: self.clients.unwrap_or_default(),
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(TracingNotifier)),
            outbox: self.outbox.unwrap_or_default(),
            skip_waiting: AtomicBool::new(false),
            push_count: AtomicU64::new(0),
        }
    }
}
