//! Lifecycle events with pending work.
//!
//! Work registered through [`ExtendableEvent::wait_until`] runs on the tokio
//! runtime and must be awaited with [`ExtendableEvent::settle`] before the
//! host recycles the event. Dropping an unsettled event aborts its tasks.

use std::future::Future;

use folio_net::Request;
use tokio::task::JoinSet;
use tracing::warn;

/// An event whose handling may outlive the handler's return.
#[derive(Debug, Default)]
pub struct ExtendableEvent {
    pending: JoinSet<()>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the event alive until `work` completes.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.spawn(work);
    }

    /// Number of tasks not yet joined.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Await all pending work. Returns how many tasks completed.
    pub async fn settle(&mut self) -> usize {
        let mut completed = 0;
        while let Some(result) = self.pending.join_next().await {
            match result {
                Ok(()) => completed += 1,
                Err(e) => warn!(error = %e, "Pending event work did not complete"),
            }
        }
        completed
    }
}

/// A request intercepted by the worker.
#[derive(Debug)]
pub struct FetchEvent {
    pub request: Request,
    lifetime: ExtendableEvent,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            lifetime: ExtendableEvent::new(),
        }
    }

    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.lifetime.wait_until(work);
    }

    pub fn pending(&self) -> usize {
        self.lifetime.pending()
    }

    pub async fn settle(&mut self) -> usize {
        self.lifetime.settle().await
    }
}
