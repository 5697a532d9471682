//! HTTP webhook transport.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Envelope, EventBus};
use crate::error::{MediaError, MediaResult};

/// Posts each envelope as JSON to a fixed endpoint
pub struct WebhookBus {
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookBus {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Server errors, throttling and timeouts are worth another attempt
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl EventBus for WebhookBus {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, envelope: &Envelope) -> MediaResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", &envelope.event.idempotency_key)
            .header("X-Partition", envelope.partition.to_string())
            .header("X-Partition-Key", envelope.event.partition_key())
            .json(envelope)
            .send()
            .await
            .map_err(|e| MediaError::TransientIo(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let reason = format!("Webhook error ({}): {}", status, text);
        if is_transient_status(status) {
            Err(MediaError::TransientIo(reason))
        } else {
            Err(MediaError::PublishFailed {
                attempts: 1,
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let bus = WebhookBus::new("http://127.0.0.1:9/events");
        let asset = crate::domain::MediaAsset::new(
            "user-1",
            crate::domain::ContentHash::of(b"x"),
        );
        let envelope = Envelope::new(crate::domain::CompletionEvent::new(&asset, &[]), 1);

        let result = bus.send(&envelope).await;
        assert!(matches!(result, Err(MediaError::TransientIo(_))));
    }
}
