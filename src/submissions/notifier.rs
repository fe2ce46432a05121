use reqwest::Client;
use serde::Serialize;

use crate::auth::UserId;
use crate::storage::models::Action;

/// Events announced to the community after they happen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    SubmissionUploaded {
        submission_id: u64,
        file_id: u64,
        uploader: UserId,
        created: bool,
        validator_action: Action,
    },
    SubmissionsCommented {
        submission_ids: Vec<u64>,
        author: UserId,
        action: Action,
    },
    SubmissionDeleted {
        submission_id: u64,
        deleted_by: UserId,
    },
}

/// Fire-and-forget notification dispatch. Delivery failures never reach the
/// caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Notification);
}

/// Notifier that only logs.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Notification) {
        tracing::info!(?event, "notification");
    }
}

/// Posts each event as JSON to a webhook on a detached task.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: Notification) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(?event, "notification delivered");
                }
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), ?event, "notification rejected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, ?event, "notification delivery failed");
                }
            }
        });
    }
}
