//! Email dispatch through the Resend HTTP API.

use async_trait::async_trait;
use lembra_core::{config::EmailProviderConfig, phone::mask_recipient, Channel};
use lembra_outbox::{DispatchError, Dispatcher, OutboxMessage};
use tracing::debug;

pub struct EmailDispatcher {
    client: reqwest::Client,
    config: EmailProviderConfig,
}

impl EmailDispatcher {
    pub fn new(config: EmailProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn dispatch(&self, msg: &OutboxMessage) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "from": self.config.from,
            "to": [msg.recipient],
            "subject": msg.subject.as_deref().unwrap_or_default(),
            "html": msg.body,
        });

        let response = self
            .client
            .post(format!("{}/emails", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            // Connect/transport errors are provider hiccups: retryable.
            .map_err(|e| DispatchError::Transient(format!("resend request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(key = %msg.key, recipient = %mask_recipient(&msg.recipient), "email accepted by provider");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(crate::classify_status("resend", status, &body))
    }
}
