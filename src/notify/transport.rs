//! Notification delivery transports
//!
//! The core renders messages; actual delivery goes through the [`Transport`]
//! trait. The webhook transport posts JSON with bounded retries (exponential
//! backoff, no retry on client errors). Delivery-receipt bookkeeping is the
//! receiving system's concern.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::RenderedMessage;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur during delivery
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint rejected the payload
    #[error("Delivery rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Invalid transport configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Trait for notification delivery transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Deliver a rendered message to a subscriber. An `Err` means the
    /// hand-off failed and the caller must not mark the slots as notified.
    async fn deliver(&self, subscriber: &str, message: &RenderedMessage) -> TransportResult<()>;
}

/// Webhook transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts on failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Webhook transport posting messages as JSON
pub struct WebhookTransport {
    config: WebhookConfig,
    client: Client,
}

impl WebhookTransport {
    pub fn new(config: WebhookConfig) -> TransportResult<Self> {
        config.validate().map_err(TransportError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn from_url(url: impl Into<String>) -> TransportResult<Self> {
        Self::new(WebhookConfig::new(url))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_payload(subscriber: &str, message: &RenderedMessage) -> serde_json::Value {
        serde_json::json!({
            "subscriber": subscriber,
            "text": message.text,
            "slot_count": message.slot_count,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> TransportResult<()> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                tracing::debug!(
                    attempt = attempt + 1,
                    max = self.config.max_retries + 1,
                    "retrying webhook delivery"
                );
            }

            match self.client.post(&self.config.url).json(payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unable to read response body".to_string());
                    last_error = Some(TransportError::Rejected {
                        status: status.as_u16(),
                        body,
                    });

                    // Client errors will not heal on retry
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(TransportError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or(TransportError::Rejected {
            status: 0,
            body: "no attempt made".to_string(),
        }))
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, subscriber: &str, message: &RenderedMessage) -> TransportResult<()> {
        let payload = Self::build_payload(subscriber, message);
        self.send_with_retry(&payload).await?;
        tracing::info!(
            subscriber,
            url = %self.config.url,
            slots = message.slot_count,
            "notification delivered"
        );
        Ok(())
    }
}

/// Transport that only logs; used when no webhook is configured
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, subscriber: &str, message: &RenderedMessage) -> TransportResult<()> {
        tracing::info!(subscriber, text = %message.text, "notification (log only)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> RenderedMessage {
        RenderedMessage {
            text: "2 slots available".to_string(),
            slot_count: 2,
        }
    }

    #[test]
    fn test_webhook_config_validation() {
        assert!(WebhookConfig::new("https://example.com/hook").validate().is_ok());
        assert!(WebhookConfig::new("").validate().is_err());
        assert!(WebhookConfig::new("example.com/hook").validate().is_err());
        assert!(WebhookConfig::new("https://example.com")
            .with_timeout(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_webhook_creation() {
        let transport = WebhookTransport::from_url("https://example.com/hook").unwrap();
        assert_eq!(transport.name(), "webhook");
        assert_eq!(transport.url(), "https://example.com/hook");

        assert!(WebhookTransport::from_url("not-a-url").is_err());
    }

    #[test]
    fn test_payload_shape() {
        let payload = WebhookTransport::build_payload("alice", &message());
        assert_eq!(payload["subscriber"], "alice");
        assert_eq!(payload["slot_count"], 2);
        assert!(payload["sent_at"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_delivers_to_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .with_status(200)
            .create_async()
            .await;

        let transport = WebhookTransport::from_url(format!("{}/hook", server.url())).unwrap();
        transport.deliver("alice", &message()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let transport = WebhookTransport::new(
            WebhookConfig::new(format!("{}/hook", server.url())).with_max_retries(3),
        )
        .unwrap();

        let err = transport.deliver("alice", &message()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 400, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let transport = WebhookTransport::new(
            WebhookConfig::new(format!("{}/hook", server.url())).with_max_retries(1),
        )
        .unwrap();

        let err = transport.deliver("alice", &message()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 503, .. }));
        mock.assert_async().await;
    }
}
