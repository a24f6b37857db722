use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Onboarding events sent to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    TenantRegistered {
        tenant_id: Uuid,
        name: String,
        namespace: String,
        contact_email: String,
    },
    TenantApproved {
        tenant_id: Uuid,
        name: String,
        namespace: String,
    },
    TenantRejected {
        tenant_id: Uuid,
        name: String,
        namespace: String,
        reason: Option<String>,
    },
    ProvisioningSucceeded {
        tenant_id: Uuid,
        namespace: String,
        created: Vec<String>,
    },
    ProvisioningFailed {
        tenant_id: Uuid,
        namespace: String,
        error: String,
    },
}

/// Delivery is best effort: implementations log failures and never return them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Posts each notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) {
        let result = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(response) => tracing::debug!(
                status = response.status().as_u16(),
                "Delivered onboarding notification"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                notification = ?notification,
                "Failed to deliver onboarding notification"
            ),
        }
    }
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &Notification) {
        tracing::debug!(notification = ?notification, "No webhook configured, dropping notification");
    }
}

#[cfg(test)]
pub mod recording {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) {
            self.sent.lock().unwrap().push(notification.clone());
        }
    }
}
