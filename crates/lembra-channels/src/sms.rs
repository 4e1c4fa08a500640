//! SMS dispatch through the Zenvia HTTP API.

use async_trait::async_trait;
use lembra_core::{
    config::SmsProviderConfig,
    phone::{mask_recipient, normalize_brazilian_phone},
    Channel,
};
use lembra_outbox::{DispatchError, Dispatcher, OutboxMessage};
use tracing::debug;

pub struct SmsDispatcher {
    client: reqwest::Client,
    config: SmsProviderConfig,
}

impl SmsDispatcher {
    pub fn new(config: SmsProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Dispatcher for SmsDispatcher {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn dispatch(&self, msg: &OutboxMessage) -> Result<(), DispatchError> {
        // Re-validate at the last moment: the number may have looked fine
        // at enqueue but the dispatchable form is decided here. An invalid
        // number can never succeed, so it is a permanent failure.
        let to = normalize_brazilian_phone(&msg.recipient).ok_or_else(|| {
            DispatchError::Permanent(format!(
                "invalid Brazilian phone number: {}",
                mask_recipient(&msg.recipient)
            ))
        })?;

        let payload = serde_json::json!({
            "from": self.config.from,
            "to": to,
            "contents": [{ "type": "text", "text": msg.body }],
        });

        let response = self
            .client
            .post(format!(
                "{}/v2/channels/sms/messages",
                self.config.base_url
            ))
            .header("X-API-TOKEN", &self.config.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transient(format!("zenvia request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(key = %msg.key, recipient = %mask_recipient(&to), "sms accepted by provider");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(crate::classify_status("zenvia", status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lembra_outbox::MessageStatus;

    fn sms_message(recipient: &str) -> OutboxMessage {
        OutboxMessage {
            key: "apt-1:24h:sms".to_string(),
            id: "id".to_string(),
            appointment_id: "apt-1".to_string(),
            channel: Channel::Sms,
            recipient: recipient.to_string(),
            subject: None,
            body: "corpo".to_string(),
            status: MessageStatus::Sending,
            attempts: 0,
            last_error: None,
            next_retry_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[tokio::test]
    async fn invalid_number_is_permanent_without_any_network_call() {
        // base_url points nowhere; validation must fail first.
        let dispatcher = SmsDispatcher::new(SmsProviderConfig {
            api_token: "token".to_string(),
            from: "clinic".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
        });

        let err = dispatcher.dispatch(&sms_message("123")).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("invalid Brazilian phone"));
    }

    #[tokio::test]
    async fn unreachable_provider_is_transient() {
        let dispatcher = SmsDispatcher::new(SmsProviderConfig {
            api_token: "token".to_string(),
            from: "clinic".to_string(),
            // Nothing listens here: the connect error must classify transient.
            base_url: "http://127.0.0.1:1".to_string(),
        });

        let err = dispatcher
            .dispatch(&sms_message("5533999999999"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
