//! Push notifications.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::{Result, ServiceWorkerError};

/// A notification as handed to the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

/// Metadata attached to a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Push delivery time, ms since epoch.
    pub date_of_arrival: i64,
    pub primary_key: u64,
}

/// Where notifications are shown.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<()>;
}

/// Logs notifications instead of displaying them.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn show(&self, notification: &Notification) -> Result<()> {
        let data = serde_json::to_string(&notification.data)
            .map_err(|e| ServiceWorkerError::Notification(e.to_string()))?;
        info!(
            title = %notification.title,
            body = %notification.body,
            data = %data,
            "Notification shown"
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications shown so far, oldest first.
    pub fn shown(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .map(|shown| shown.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotifier {
    async fn show(&self, notification: &Notification) -> Result<()> {
        self.shown
            .lock()
            .map_err(|e| ServiceWorkerError::Notification(e.to_string()))?
            .push(notification.clone());
        Ok(())
    }
}
