//! # Folio Service Worker
//!
//! Offline cache worker for the Folio portfolio site.
//!
//! ## Features
//!
//! - **Versioned caches**: one namespace per deployment, stale ones purged on activate
//! - **Precache**: the manifest is fetched and stored all-or-nothing at install
//! - **Fetch routing**: network-first for documents, cache-first for assets,
//!   offline fallback to the cached root document
//! - **Control messages**: `SKIP_WAITING` promotes a waiting worker
//! - **Push / background sync**: notifications and deferred-submission replay
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     │
//!     ├── Registration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     │
//!     ├── Clients ──── controller per open page
//!     │
//!     └── CacheStorage (shared, outlives workers)
//!             └── Cache "portfolio-v1"
//!                     └── GET url → CacheEntry
//! ```

use folio_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod event;
pub mod handlers;
pub mod lifecycle;
pub mod notify;
pub mod outbox;
pub mod persist;
pub mod routing;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheKey, CacheStorage, SharedCacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{NotificationConfig, WorkerConfig};
pub use container::{Registration, ServiceWorkerContainer, ServiceWorkerEvent};
pub use event::{ExtendableEvent, FetchEvent};
pub use handlers::{ControlMessage, SyncReport};
pub use lifecycle::{ActivateReport, InstallReport};
pub use notify::{MemoryNotifier, Notification, NotificationData, NotificationSink, TracingNotifier};
pub use outbox::{Outbox, Submission};
pub use routing::{FetchDisposition, FetchResponse, ResponseSource};
pub use worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
