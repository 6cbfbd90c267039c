use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use gateway_channels::Channel;
use gateway_core::config::WhatsAppTwilioConfig;
use gateway_core::{Attachment, AttachmentType, GatewayError, InboundMessage, MessageType, OutboundMessage, Result};
use gateway_signatures::twilio;
use tracing::{info, warn};

/// WhatsApp channel adapter over the Twilio Messaging API. Ingress is
/// form-encoded webhook params; egress is the Twilio REST `Messages`
/// endpoint with the `whatsapp:` destination prefix.
pub struct WhatsAppAdapter {
    channel_id: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    http: reqwest::Client,
}

impl WhatsAppAdapter {
    pub fn new(config: WhatsAppTwilioConfig) -> Self {
        Self {
            channel_id: config.channel_id,
            account_sid: config.account_sid,
            auth_token: config.auth_token,
            from_number: config.from_number,
            http: reqwest::Client::new(),
        }
    }

    /// Verifies `X-Twilio-Signature` over `url` + the sorted form params,
    /// then parses the webhook body into an [`InboundMessage`].
    pub fn parse_event(
        &self,
        url: &str,
        signature: &str,
        params: &HashMap<String, String>,
    ) -> Result<InboundMessage> {
        let param_pairs: Vec<(String, String)> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if !twilio::verify_signature(&self.auth_token, url, &param_pairs, signature) {
            return Err(GatewayError::Authentication("invalid twilio signature".into()));
        }

        let message_sid = params
            .get("MessageSid")
            .ok_or_else(|| GatewayError::Validation("missing MessageSid".into()))?;
        let from = params
            .get("From")
            .ok_or_else(|| GatewayError::Validation("missing From".into()))?;
        let from_peer = from.strip_prefix("whatsapp:").unwrap_or(from).to_string();
        let body = params.get("Body").cloned();

        let num_media: usize = params
            .get("NumMedia")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        let mut attachments = Vec::new();
        for i in 0..num_media {
            let Some(url) = params.get(&format!("MediaUrl{i}")) else { continue };
            let content_type = params.get(&format!("MediaContentType{i}")).cloned();
            let kind = content_type
                .as_deref()
                .map(AttachmentType::from_mime)
                .unwrap_or(AttachmentType::Document);
            attachments.push(Attachment {
                kind,
                url: url.clone(),
                content_type,
                file_name: None,
                size_bytes: None,
            });
        }

        let kind = match attachments.first() {
            Some(attachment) => match attachment.kind {
                AttachmentType::Image => MessageType::Image,
                AttachmentType::Audio => MessageType::Audio,
                AttachmentType::Video => MessageType::Video,
                AttachmentType::Document => MessageType::File,
            },
            None => MessageType::Text,
        };

        InboundMessage::new(
            self.channel_id.clone(),
            from_peer.clone(),
            from_peer,
            message_sid.clone(),
            Utc::now(),
            kind,
            body,
            attachments,
            None,
            serde_json::to_value(params).unwrap_or_default(),
        )
    }
}

#[async_trait]
impl Channel for WhatsAppAdapter {
    fn get_channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn send_message(&self, message: &OutboundMessage) -> bool {
        let to = format!("whatsapp:{}", message.user_key);
        let from = format!("whatsapp:{}", self.from_number);

        let mut form: Vec<(&str, String)> = vec![("To", to), ("From", from)];
        if let Some(text) = &message.text {
            form.push(("Body", text.clone()));
        }
        if let Some(attachment) = message.attachments.first() {
            if message.attachments.len() > 1 {
                warn!(
                    channel_id = %self.channel_id,
                    "whatsapp outbound supports one media url per message, dropping {} extra attachment(s)",
                    message.attachments.len() - 1
                );
            }
            form.push(("MediaUrl", attachment.url.clone()));
        }

        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let result = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(channel_id = %self.channel_id, "whatsapp message sent");
                true
            }
            Ok(resp) => {
                warn!(channel_id = %self.channel_id, status = %resp.status(), "whatsapp send failed");
                false
            }
            Err(e) => {
                warn!(channel_id = %self.channel_id, error = %e, "whatsapp send errored");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_signatures::twilio::compute_signature;

    fn adapter() -> WhatsAppAdapter {
        WhatsAppAdapter::new(WhatsAppTwilioConfig {
            channel_id: "whatsapp_business".into(),
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from_number: "+15550001111".into(),
        })
    }

    fn signed_params(url: &str, auth_token: &str, params: &[(&str, &str)]) -> (HashMap<String, String>, String) {
        let owned: Vec<(String, String)> =
            params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let sig = compute_signature(auth_token, url, &owned);
        let map: HashMap<String, String> = owned.into_iter().collect();
        (map, sig)
    }

    #[test]
    fn parse_event_rejects_bad_signature() {
        let adapter = adapter();
        let (params, _) = signed_params(
            "https://gw.example/wa",
            "secret",
            &[("MessageSid", "SM1"), ("From", "whatsapp:+15551234567"), ("Body", "hi")],
        );
        let err = adapter.parse_event("https://gw.example/wa", "bogus", &params).unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION");
    }

    #[test]
    fn parse_event_strips_whatsapp_prefix_for_user_and_conversation_key() {
        let adapter = adapter();
        let (params, sig) = signed_params(
            "https://gw.example/wa",
            "secret",
            &[("MessageSid", "SM1"), ("From", "whatsapp:+15551234567"), ("Body", "hi")],
        );
        let msg = adapter.parse_event("https://gw.example/wa", &sig, &params).unwrap();
        assert_eq!(msg.user_key, "+15551234567");
        assert_eq!(msg.conversation_key, "+15551234567");
        assert_eq!(msg.text.as_deref(), Some("hi"));
    }

    #[test]
    fn parse_event_maps_media_by_mime() {
        let adapter = adapter();
        let (params, sig) = signed_params(
            "https://gw.example/wa",
            "secret",
            &[
                ("MessageSid", "SM1"),
                ("From", "whatsapp:+15551234567"),
                ("NumMedia", "1"),
                ("MediaUrl0", "https://example.com/a.png"),
                ("MediaContentType0", "image/png"),
            ],
        );
        let msg = adapter.parse_event("https://gw.example/wa", &sig, &params).unwrap();
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].kind, AttachmentType::Image);
        assert_eq!(msg.kind, MessageType::Image);
    }
}
