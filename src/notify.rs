// src/notify.rs
//! Notification gateway: push alerts to candidates.
//!
//! Delivery is fire-and-forget from the dispatcher's side. Failures come
//! back as values so callers can log them and move on.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// De-duplication key. Re-sending the same id is a no-op downstream.
    pub event_id: Uuid,
    /// A persona id, a user id, or a topic such as `broadcast:<id>`.
    pub audience: String,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(audience: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            audience: audience.into(),
            title: title.into(),
            body: body.into(),
        }
    }

    /// Stable event id derived from the triggering document write, so that
    /// replays of the same write collapse onto one notification.
    pub fn for_write(
        audience: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        document_id: &str,
        version: u64,
    ) -> Self {
        let key = format!("{document_id}@{version}");
        Self {
            event_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()),
            ..Self::new(audience, title, body)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Already delivered under the same event id.
    Duplicate,
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<Delivery>;
}

/// Writes notifications to the log. Default when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationGateway for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<Delivery> {
        info!(
            "Notify {} [{}]: {} - {}",
            notification.audience, notification.event_id, notification.title, notification.body
        );
        Ok(Delivery::Delivered)
    }
}

/// POSTs each notification as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationGateway for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<Delivery> {
        debug!("Posting notification {} to {}", notification.event_id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| SyncError::Notification(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(Delivery::Delivered)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(SyncError::Notification(format!(
                "webhook returned {}: {}",
                status, error_text
            )))
        }
    }
}

/// Delivers each event id at most once through the wrapped gateway.
/// An id is claimed before delivery and released again if delivery fails,
/// so failed sends may be retried by the caller.
pub struct DedupNotifier {
    inner: Arc<dyn NotificationGateway>,
    delivered: Mutex<HashSet<Uuid>>,
}

impl DedupNotifier {
    pub fn new(inner: Arc<dyn NotificationGateway>) -> Self {
        Self {
            inner,
            delivered: Mutex::new(HashSet::new()),
        }
    }

    /// Marks `id` as sent. Returns `false` when it was already claimed.
    fn claim(&self, id: Uuid) -> bool {
        match self.delivered.lock() {
            Ok(mut set) => set.insert(id),
            Err(_) => {
                warn!("Dedup set poisoned; delivering {} unchecked", id);
                true
            }
        }
    }

    fn release(&self, id: &Uuid) {
        if let Ok(mut set) = self.delivered.lock() {
            set.remove(id);
        }
    }
}

#[async_trait]
impl NotificationGateway for DedupNotifier {
    async fn notify(&self, notification: &Notification) -> Result<Delivery> {
        if !self.claim(notification.event_id) {
            debug!("Suppressing duplicate notification {}", notification.event_id);
            return Ok(Delivery::Duplicate);
        }

        match self.inner.notify(notification).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.release(&notification.event_id);
                Err(e)
            }
        }
    }
}

/// Sends and logs the failure instead of returning it.
pub async fn notify_and_log(gateway: &dyn NotificationGateway, notification: Notification) {
    if let Err(e) = gateway.notify(&notification).await {
        warn!(
            "Notification {} to {} failed: {}",
            notification.event_id, notification.audience, e
        );
    }
}

/// Builds the gateway stack from an optional webhook URL.
pub fn gateway_from_config(
    webhook_url: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn NotificationGateway>> {
    let inner: Arc<dyn NotificationGateway> = match webhook_url {
        Some(url) if !url.trim().is_empty() => {
            info!("Notifications go to webhook {}", url);
            Arc::new(WebhookNotifier::new(url, timeout)?)
        }
        _ => Arc::new(LogNotifier),
    };
    Ok(Arc::new(DedupNotifier::new(inner)))
}
