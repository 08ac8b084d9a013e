//! Registration and event dispatch.
//!
//! The container is the host side: it owns the shared storage, tracks which
//! worker version is installing, waiting or active, and routes lifecycle
//! events to the right one.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use folio_net::{Fetcher, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::SharedCacheStorage;
use crate::clients::{Client, Clients};
use crate::config::WorkerConfig;
use crate::event::FetchEvent;
use crate::handlers::{ControlMessage, SyncReport};
use crate::lifecycle::InstallReport;
use crate::notify::{Notification, NotificationSink};
use crate::outbox::Outbox;
use crate::routing::FetchDisposition;
use crate::worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};
use crate::{Result, ServiceWorkerError};

// ==================== Registration ====================

/// A worker in one registration slot.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub worker: Arc<ServiceWorker>,
    pub state: ServiceWorkerState,
    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl WorkerSlot {
    fn new(worker: Arc<ServiceWorker>, state: ServiceWorkerState) -> Self {
        Self {
            worker,
            state,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// The site's worker registration.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<WorkerSlot>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<WorkerSlot>,

    /// Active worker.
    pub active: Option<WorkerSlot>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn active_worker(&self) -> Option<Arc<ServiceWorker>> {
        self.active.as_ref().map(|s| Arc::clone(&s.worker))
    }

    pub fn waiting_worker(&self) -> Option<Arc<ServiceWorker>> {
        self.waiting.as_ref().map(|s| Arc::clone(&s.worker))
    }

    /// Transition installing to waiting.
    fn install_complete(&mut self) {
        if let Some(mut slot) = self.installing.take() {
            slot.set_state(ServiceWorkerState::Installed);
            // A newer install replaces an older waiting worker.
            if let Some(mut old) = self.waiting.replace(slot) {
                old.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    /// Mark the installing worker redundant.
    fn install_failed(&mut self) {
        if let Some(mut slot) = self.installing.take() {
            slot.set_state(ServiceWorkerState::Redundant);
        }
    }
}

// ==================== Container ====================

/// Events emitted by the container.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new version started installing.
    UpdateFound { cache_version: String },
    /// A page's controller changed.
    ControllerChange { client_id: String },
}

/// Host for the site's workers.
pub struct ServiceWorkerContainer {
    registration: RwLock<Registration>,

    /// Cache storage, shared across every worker version.
    caches: SharedCacheStorage,

    clients: Arc<RwLock<Clients>>,
    outbox: Arc<RwLock<Outbox>>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn NotificationSink>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container for `scope`.
    pub fn new(
        scope: Url,
        caches: SharedCacheStorage,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn NotificationSink>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: RwLock::new(Registration::new(scope)),
                caches,
                clients: Arc::new(RwLock::new(Clients::new())),
                outbox: Arc::new(RwLock::new(Outbox::new())),
                fetcher,
                notifier,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn caches(&self) -> SharedCacheStorage {
        Arc::clone(&self.caches)
    }

    /// Deploy a worker version: install it, then activate it right away if
    /// it asked to skip waiting, nothing is active yet, or no page is open.
    /// Otherwise it waits.
    pub async fn register(&self, config: WorkerConfig) -> Result<InstallReport> {
        config.validate()?;

        let worker = Arc::new(
            ServiceWorker::builder(config, Arc::clone(&self.fetcher))
                .caches(Arc::clone(&self.caches))
                .clients(Arc::clone(&self.clients))
                .notifier(Arc::clone(&self.notifier))
                .outbox(Arc::clone(&self.outbox))
                .build(),
        );
        let id = worker.id();

        self.emit(ServiceWorkerEvent::UpdateFound {
            cache_version: worker.cache_name().to_string(),
        });
        {
            let mut registration = self.registration.write().await;
            registration.installing = Some(WorkerSlot::new(
                Arc::clone(&worker),
                ServiceWorkerState::Installing,
            ));
        }
        self.emit_state(id, ServiceWorkerState::Installing);

        let report = match worker.install().await {
            Ok(report) => report,
            Err(e) => {
                warn!(worker = %id, error = %e, "Install failed");
                self.registration.write().await.install_failed();
                self.emit_state(id, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };

        let activate_now = {
            let mut registration = self.registration.write().await;
            registration.install_complete();
            worker.skip_waiting_requested()
                || registration.active.is_none()
                || self.clients.read().await.is_empty()
        };
        self.emit_state(id, ServiceWorkerState::Installed);

        if activate_now {
            self.activate_waiting().await?;
        } else {
            info!(worker = %id, "Installed, waiting for pages to close");
        }
        Ok(report)
    }

    /// Promote the waiting worker. Returns `false` if none is waiting.
    pub async fn activate_waiting(&self) -> Result<bool> {
        let worker = {
            let mut registration = self.registration.write().await;
            let Some(mut slot) = registration.waiting.take() else {
                return Ok(false);
            };
            slot.set_state(ServiceWorkerState::Activating);
            let worker = Arc::clone(&slot.worker);

            if let Some(mut old) = registration.active.replace(slot) {
                old.set_state(ServiceWorkerState::Redundant);
                self.emit_state(old.worker.id(), ServiceWorkerState::Redundant);
            }
            worker
        };
        self.emit_state(worker.id(), ServiceWorkerState::Activating);

        let report = worker.activate().await?;

        if let Some(slot) = self.registration.write().await.active.as_mut() {
            if slot.worker.id() == worker.id() {
                slot.set_state(ServiceWorkerState::Activated);
            }
        }
        self.emit_state(worker.id(), ServiceWorkerState::Activated);

        for client_id in report.claimed {
            self.emit(ServiceWorkerEvent::ControllerChange { client_id });
        }
        Ok(true)
    }

    /// A page was opened; it is controlled by the active worker, if any.
    pub async fn open_page(&self, url: Url) -> Client {
        let controller = self
            .registration
            .read()
            .await
            .active
            .as_ref()
            .map(|s| s.worker.id());
        self.clients.write().await.open_window(url, controller)
    }

    /// A page was closed. When the last page closes, a waiting worker is
    /// promoted.
    pub async fn close_page(&self, client_id: &str) -> Result<()> {
        let now_empty = {
            let mut clients = self.clients.write().await;
            clients.remove(client_id);
            clients.is_empty()
        };
        if now_empty && self.activate_waiting().await? {
            debug!("Last page closed, waiting worker promoted");
        }
        Ok(())
    }

    /// Deliver a page message. It goes to the waiting worker if there is
    /// one, else the active worker. `SKIP_WAITING` promotes the waiting
    /// worker immediately.
    pub async fn post_message(&self, data: &str) -> Result<Option<ControlMessage>> {
        let target = {
            let registration = self.registration.read().await;
            registration
                .waiting_worker()
                .or_else(|| registration.active_worker())
        };
        let Some(worker) = target else {
            return Ok(None);
        };

        let message = worker.handle_message(data);
        if message == Some(ControlMessage::SkipWaiting) {
            self.activate_waiting().await?;
        }
        Ok(message)
    }

    /// Route a request through the active worker. Without one every request
    /// passes through.
    pub async fn fetch(&self, request: Request) -> Result<FetchDisposition> {
        let Some(worker) = self.active().await else {
            return Ok(FetchDisposition::PassThrough);
        };

        let mut event = FetchEvent::new(request);
        let result = worker.handle_fetch(&mut event).await;
        event.settle().await;
        result
    }

    pub async fn push(&self, payload: Option<&str>) -> Result<Notification> {
        let worker = self.require_active().await?;
        worker.handle_push(payload).await
    }

    pub async fn sync(&self, tag: &str) -> Result<Option<SyncReport>> {
        let worker = self.require_active().await?;
        Ok(worker.handle_sync(tag).await)
    }

    /// Queue a POST for the next background sync.
    pub async fn defer_submission(
        &self,
        url: Url,
        content_type: &str,
        body: Bytes,
    ) -> Result<Uuid> {
        let worker = self.require_active().await?;
        Ok(worker.defer_submission(url, content_type, body).await)
    }

    pub async fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.registration.read().await.active_worker()
    }

    pub async fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.registration.read().await.waiting_worker()
    }

    /// State of the worker with `id`, if still in a slot.
    pub async fn state_of(&self, id: ServiceWorkerId) -> Option<ServiceWorkerState> {
        let registration = self.registration.read().await;
        let state = [&registration.installing, &registration.waiting, &registration.active]
            .into_iter()
            .flatten()
            .find(|slot| slot.worker.id() == id)
            .map(|slot| slot.state);
        state
    }

    pub async fn client(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    async fn require_active(&self) -> Result<Arc<ServiceWorker>> {
        self.active()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("no active worker".to_string()))
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}
