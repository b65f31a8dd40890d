//! Success notifications.
//!
//! Delivery is detached from the pipeline: a slow or failing endpoint never
//! delays or rolls back the Success record.

use crate::config::WebhookConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Payload posted after a file reaches Success.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SuccessEvent {
    pub file_path: String,
    pub cid: String,
    pub content_hash: String,
}

pub trait Notifier: Send + Sync {
    /// Fire and forget. Must not block.
    fn notify_success(&self, event: SuccessEvent);
}

/// Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify_success(&self, event: SuccessEvent) {
        debug!(path = %event.file_path, "No webhook configured");
    }
}

/// POSTs each [`SuccessEvent`] as JSON from a spawned task.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify_success(&self, event: SuccessEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&event)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            match result {
                Ok(resp) => {
                    debug!(path = %event.file_path, status = %resp.status(), "Webhook delivered")
                }
                Err(e) => warn!(path = %event.file_path, url = %url, error = %e, "Webhook failed"),
            }
        });
    }
}
