// Notification collaborator: fire-and-forget, never fails the workflow

use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery; implementations swallow and log their own
    /// failures.
    async fn notify(&self, message: &str);
}

/// Logs notifications instead of delivering them anywhere.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!("notification: {}", message);
    }
}

/// Posts notifications to a webhook as `{"text": ...}`.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        let body = serde_json::json!({ "text": message });
        match self.http.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!("notification webhook returned {}", response.status());
            }
            Err(e) => {
                warn!("notification webhook unreachable: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_webhook_posts_text_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"text": "position rebalanced"}"#.to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;

        WebhookNotifier::new(server.url())
            .notify("position rebalanced")
            .await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_failure_is_swallowed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(500)
            .create_async()
            .await;

        // Must not panic or propagate
        WebhookNotifier::new(server.url()).notify("ignored").await;
    }
}
