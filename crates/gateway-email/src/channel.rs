use std::sync::Arc;

use async_trait::async_trait;
use gateway_channels::Channel;
use gateway_core::OutboundMessage;
use tracing::warn;

use crate::provider::{EmailProvider, OutboundEmail};

const DEFAULT_SUBJECT: &str = "Message from the gateway";

/// Channel adapter wrapping an [`EmailProvider`]; registered into the
/// [`gateway_channels::ChannelManager`] so `MessageBus::send_outbound` can
/// route replies back through it.
pub struct EmailChannelAdapter {
    channel_id: String,
    provider: Arc<dyn EmailProvider>,
}

impl EmailChannelAdapter {
    pub fn new(channel_id: impl Into<String>, provider: Arc<dyn EmailProvider>) -> Self {
        Self { channel_id: channel_id.into(), provider }
    }
}

#[async_trait]
impl Channel for EmailChannelAdapter {
    fn get_channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn send_message(&self, message: &OutboundMessage) -> bool {
        let Some(text) = &message.text else {
            warn!(channel_id = %self.channel_id, "email adapter only supports text outbound");
            return false;
        };

        let (in_reply_to, references) = message
            .reply_to_message_id
            .as_deref()
            .and_then(|id| id.strip_prefix("email_"))
            .map(|stripped| (format!("<{stripped}>"), format!("<{stripped}>")))
            .unzip();

        let mut subject = message
            .metadata
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string();
        if in_reply_to.is_some() && !subject.starts_with("Re: ") {
            subject = format!("Re: {subject}");
        }

        let to_addresses = vec![message.user_key.clone()];
        let email = OutboundEmail {
            to_addresses: &to_addresses,
            subject: &subject,
            text_body: Some(text.as_str()),
            html_body: None,
            in_reply_to: in_reply_to.as_deref(),
            references: references.as_deref(),
            cc_addresses: None,
        };

        match self.provider.send_message(email).await {
            Ok(_) => true,
            Err(e) => {
                warn!(channel_id = %self.channel_id, error = %e, "email send failed");
                false
            }
        }
    }
}
