use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_channels::Channel;
use gateway_core::config::TelegramConfig;
use gateway_core::{Attachment, AttachmentType, GatewayError, InboundMessage, MessageType, OutboundMessage, Result};
use gateway_signatures::telegram::verify_secret_token;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
    caption: Option<String>,
    photo: Option<Vec<TgPhotoSize>>,
    audio: Option<TgFile>,
    voice: Option<TgFile>,
    video: Option<TgFile>,
    document: Option<TgFile>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
    #[serde(default)]
    file_size: i64,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_id: String,
    mime_type: Option<String>,
}

/// Telegram channel adapter over the Bot API. Ingress is the JSON
/// `Update` webhook payload; egress is a plain `sendMessage` POST.
pub struct TelegramAdapter {
    channel_id: String,
    bot_token: String,
    webhook_secret_token: String,
    http: reqwest::Client,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            channel_id: config.channel_id,
            bot_token: config.bot_token,
            webhook_secret_token: config.webhook_secret_token,
            http: reqwest::Client::new(),
        }
    }

    /// Verifies `X-Telegram-Bot-Api-Secret-Token`, then parses the update.
    /// Non-`message` updates and bot-authored messages are silently
    /// dropped, returning `Ok(None)`.
    pub fn parse_update(&self, secret_header: &str, body: &str) -> Result<Option<InboundMessage>> {
        if !verify_secret_token(&self.webhook_secret_token, secret_header) {
            return Err(GatewayError::Authentication("invalid telegram secret token".into()));
        }

        let update: Update = serde_json::from_str(body)?;
        let Some(message) = update.message else {
            return Ok(None);
        };
        if message.from.as_ref().map(|f| f.is_bot).unwrap_or(false) {
            return Ok(None);
        }

        let user_key = message
            .from
            .as_ref()
            .map(|f| f.id.to_string())
            .ok_or_else(|| GatewayError::Validation("message missing from.id".into()))?;
        let conversation_key = message.chat.id.to_string();
        let message_id = format!("tg_{}_{}", update.update_id, message.message_id);
        let timestamp = DateTime::from_timestamp(message.date, 0).unwrap_or_else(Utc::now);

        let mut attachments = Vec::new();
        if let Some(photos) = &message.photo {
            if let Some(largest) = photos.iter().max_by_key(|p| p.file_size) {
                attachments.push(Attachment {
                    kind: AttachmentType::Image,
                    url: largest.file_id.clone(),
                    content_type: None,
                    file_name: None,
                    size_bytes: if largest.file_size > 0 { Some(largest.file_size as u64) } else { None },
                });
            }
        }
        for (file, kind) in [
            (&message.audio, AttachmentType::Audio),
            (&message.voice, AttachmentType::Audio),
            (&message.video, AttachmentType::Video),
            (&message.document, AttachmentType::Document),
        ] {
            if let Some(file) = file {
                attachments.push(Attachment {
                    kind,
                    url: file.file_id.clone(),
                    content_type: file.mime_type.clone(),
                    file_name: None,
                    size_bytes: None,
                });
            }
        }

        let text = message.text.or(message.caption);
        let kind = if attachments.is_empty() {
            MessageType::Text
        } else {
            match attachments[0].kind {
                AttachmentType::Image => MessageType::Image,
                AttachmentType::Audio => MessageType::Audio,
                AttachmentType::Video => MessageType::Video,
                AttachmentType::Document => MessageType::File,
            }
        };

        let raw = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
        let inbound = InboundMessage::new(
            self.channel_id.clone(),
            user_key,
            conversation_key,
            message_id,
            timestamp,
            kind,
            text,
            attachments,
            None,
            raw,
        )?;
        Ok(Some(inbound))
    }

    /// Extracts `(update_id, message_id)` from a composite `tg_{u}_{m}` id.
    fn parse_composite_message_id(message_id: &str) -> Option<i64> {
        message_id.strip_prefix("tg_")?.rsplit_once('_')?.1.parse().ok()
    }
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn get_channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn send_message(&self, message: &OutboundMessage) -> bool {
        let Some(text) = &message.text else {
            warn!(channel_id = %self.channel_id, "telegram adapter only supports text outbound");
            return false;
        };

        let mut body = serde_json::json!({
            "chat_id": message.conversation_key,
            "text": text,
        });
        if let Some(reply_to) = message.reply_to_message_id.as_deref().and_then(Self::parse_composite_message_id) {
            body["reply_to_message_id"] = serde_json::Value::from(reply_to);
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(channel_id = %self.channel_id, "telegram message sent");
                true
            }
            Ok(resp) => {
                warn!(channel_id = %self.channel_id, status = %resp.status(), "telegram send failed");
                false
            }
            Err(e) => {
                warn!(channel_id = %self.channel_id, error = %e, "telegram send errored");
                false
            }
        }
    }
}
