use serde::Serialize;
use std::fmt;

/// Lifecycle points that trigger a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ProvisionInput,
    Run,
    ProvisionOutput,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ProvisionInput => "provision-in",
            Phase::Run => "workflow-start",
            Phase::ProvisionOutput => "provision-out",
            Phase::Completed => "workflow-complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    username: &'a str,
}

/// Posts lifecycle messages to a webhook. Never fails a run.
#[derive(Clone)]
pub struct NotificationClient {
    client: reqwest::Client,
    url: Option<String>,
    uuid: Option<String>,
}

impl NotificationClient {
    pub fn new(url: Option<String>, uuid: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            uuid,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn message(uuid: &str, phase: Phase, success: bool) -> String {
        if success {
            format!("{}: {}", uuid, phase)
        } else {
            format!("{}: failed-{}", uuid, phase)
        }
    }

    pub async fn send(&self, phase: Phase, success: bool) {
        let Some(uuid) = self.uuid.as_deref() else {
            return;
        };
        let text = Self::message(uuid, phase, success);
        let Some(url) = self.url.as_deref() else {
            tracing::warn!("No notifications URL configured, not sending: {}", text);
            return;
        };

        let payload = WebhookPayload {
            text: &text,
            username: "wfl",
        };
        let sent = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match sent {
            Ok(_) => tracing::debug!("Sent notification: {}", text),
            Err(e) => tracing::warn!("Could not send notification '{}': {}", text, e),
        }
    }
}
