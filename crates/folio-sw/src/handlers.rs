//! Message, push and background sync handlers.

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::notify::{Notification, NotificationData};
use crate::outbox;
use crate::worker::ServiceWorker;
use crate::Result;

/// Control messages understood by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Promote the waiting worker without waiting for pages to close.
    SkipWaiting,
}

impl ControlMessage {
    /// Parse a message; anything unrecognized is `None`.
    pub fn parse(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}

/// Outcome of a background sync replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Submissions delivered and removed.
    pub sent: usize,
    /// Submissions attempted but kept.
    pub retained: usize,
    /// Submissions still queued afterwards.
    pub remaining: usize,
}

impl ServiceWorker {
    /// Handle a message from a page. Unrecognized messages are ignored.
    pub fn handle_message(&self, data: &str) -> Option<ControlMessage> {
        let Some(message) = ControlMessage::parse(data) else {
            debug!(worker = %self.id, "Ignoring unrecognized message");
            return None;
        };

        match message {
            ControlMessage::SkipWaiting => {
                info!(worker = %self.id, "Skip waiting requested by page");
                self.skip_waiting();
            }
        }
        Some(message)
    }

    /// Handle a push: show a notification built from the payload text, or
    /// the default body when there is no payload.
    pub async fn handle_push(&self, payload: Option<&str>) -> Result<Notification> {
        let settings = &self.config.notification;
        let notification = Notification {
            title: settings.title.clone(),
            body: payload
                .map(str::to_string)
                .unwrap_or_else(|| settings.default_body.clone()),
            icon: settings.icon.clone(),
            badge: settings.badge.clone(),
            vibrate: settings.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: chrono::Utc::now().timestamp_millis(),
                primary_key: self.next_push_key(),
            },
        };

        self.notifier.show(&notification).await?;
        Ok(notification)
    }

    /// Queue a submission for the next background sync.
    pub async fn defer_submission(
        &self,
        url: Url,
        content_type: impl Into<String>,
        body: Bytes,
    ) -> Uuid {
        self.outbox.write().await.enqueue(url, content_type, body)
    }

    /// Handle a sync event. Only the configured tag replays the outbox;
    /// other tags return `None`.
    pub async fn handle_sync(&self, tag: &str) -> Option<SyncReport> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring sync tag");
            return None;
        }

        let submissions = self.outbox.read().await.snapshot();
        let (delivered, failed) = outbox::replay(&submissions, self.fetcher.as_ref()).await;

        let mut queue = self.outbox.write().await;
        queue.settle(&delivered, &failed);
        let report = SyncReport::from_outcome(&delivered, &failed, queue.len());

        info!(
            tag,
            sent = report.sent,
            retained = report.retained,
            remaining = report.remaining,
            "Background sync finished"
        );
        Some(report)
    }
}
