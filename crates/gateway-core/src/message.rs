use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

/// Discriminates the payload carried by an [`InboundMessage`] / [`OutboundMessage`].
///
/// A tagged union per the DESIGN NOTES ("Use tagged-union (sum type) for
/// `MessageType`") rather than the source's ad-hoc string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Video,
    File,
    Location,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Image,
    Audio,
    Video,
    Document,
}

impl AttachmentType {
    /// Map a MIME type prefix the way every inbound media adapter needs to
    /// (Twilio, Telegram, Slack): image/ → Image, audio/ → Audio,
    /// video/ → Video, anything else → Document.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            AttachmentType::Image
        } else if mime.starts_with("audio/") {
            AttachmentType::Audio
        } else if mime.starts_with("video/") {
            AttachmentType::Video
        } else {
            AttachmentType::Document
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentType,
    pub url: String,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Immutable-after-construction inbound message, uniform across every
/// channel adapter (§3 DATA MODEL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub user_key: String,
    pub conversation_key: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
    pub location: Option<Location>,
    /// Opaque original provider payload, retained for debugging/audit
    /// replay. See SPEC_FULL.md §9 Open Questions re: retention/PII.
    pub raw: Value,
    pub metadata: HashMap<String, Value>,
}

impl InboundMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_id: impl Into<String>,
        user_key: impl Into<String>,
        conversation_key: impl Into<String>,
        message_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        kind: MessageType,
        text: Option<String>,
        attachments: Vec<Attachment>,
        location: Option<Location>,
        raw: Value,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        let user_key = user_key.into();
        let conversation_key = conversation_key.into();
        let message_id = message_id.into();
        if channel_id.is_empty() || user_key.is_empty() || message_id.is_empty() {
            return Err(GatewayError::Validation(
                "channel_id, user_key and message_id must be non-empty".into(),
            ));
        }
        if kind == MessageType::Location && location.is_none() {
            return Err(GatewayError::Validation(
                "location message requires a location".into(),
            ));
        }
        Ok(Self {
            channel_id,
            user_key,
            conversation_key,
            message_id,
            timestamp,
            kind,
            text,
            attachments,
            location,
            raw,
            metadata: HashMap::new(),
        })
    }
}

/// Outbound message, mirroring [`InboundMessage`]'s identifying keys plus a
/// reply pointer.
///
/// Validation invariant (constructor-enforced, per DESIGN NOTES):
/// `type==text ⇒ text≠∅`; `type∈{image,audio,video,file} ⇒ attachments≠∅`;
/// `type==location ⇒ location≠null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub user_key: String,
    pub conversation_key: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub text: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub location: Option<Location>,
    pub metadata: HashMap<String, Value>,
}

impl OutboundMessage {
    pub fn new(
        channel_id: impl Into<String>,
        user_key: impl Into<String>,
        conversation_key: impl Into<String>,
        kind: MessageType,
        text: Option<String>,
    ) -> Result<Self> {
        Self::validate(kind, &text, &[], &None)?;
        Ok(Self {
            channel_id: channel_id.into(),
            user_key: user_key.into(),
            conversation_key: conversation_key.into(),
            kind,
            text,
            reply_to_message_id: None,
            attachments: Vec::new(),
            location: None,
            metadata: HashMap::new(),
        })
    }

    pub fn text(
        channel_id: impl Into<String>,
        user_key: impl Into<String>,
        conversation_key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(channel_id, user_key, conversation_key, MessageType::Text, Some(text.into()))
            .expect("text messages always satisfy the validation invariant")
    }

    pub fn with_attachments(
        channel_id: impl Into<String>,
        user_key: impl Into<String>,
        conversation_key: impl Into<String>,
        kind: MessageType,
        attachments: Vec<Attachment>,
    ) -> Result<Self> {
        Self::validate(kind, &None, &attachments, &None)?;
        Ok(Self {
            channel_id: channel_id.into(),
            user_key: user_key.into(),
            conversation_key: conversation_key.into(),
            kind,
            text: None,
            reply_to_message_id: None,
            attachments,
            location: None,
            metadata: HashMap::new(),
        })
    }

    fn validate(
        kind: MessageType,
        text: &Option<String>,
        attachments: &[Attachment],
        location: &Option<Location>,
    ) -> Result<()> {
        match kind {
            MessageType::Text => {
                if text.as_deref().unwrap_or("").is_empty() {
                    return Err(GatewayError::Validation(
                        "text message requires non-empty text".into(),
                    ));
                }
            }
            MessageType::Image | MessageType::Audio | MessageType::Video | MessageType::File => {
                if attachments.is_empty() {
                    return Err(GatewayError::Validation(format!(
                        "{:?} message requires at least one attachment",
                        kind
                    )));
                }
            }
            MessageType::Location => {
                if location.is_none() {
                    return Err(GatewayError::Validation(
                        "location message requires a location".into(),
                    ));
                }
            }
            MessageType::System => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_rejects_empty_ids() {
        let err = InboundMessage::new(
            "",
            "u1",
            "c1",
            "m1",
            Utc::now(),
            MessageType::Text,
            Some("hi".into()),
            vec![],
            None,
            Value::Null,
        )
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn outbound_text_requires_text() {
        let err = OutboundMessage::new("c1", "u1", "c1", MessageType::Text, None).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn outbound_image_requires_attachment() {
        let err = OutboundMessage::with_attachments("c1", "u1", "c1", MessageType::Image, vec![])
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn attachment_type_from_mime() {
        assert_eq!(AttachmentType::from_mime("image/png"), AttachmentType::Image);
        assert_eq!(AttachmentType::from_mime("audio/ogg"), AttachmentType::Audio);
        assert_eq!(AttachmentType::from_mime("video/mp4"), AttachmentType::Video);
        assert_eq!(AttachmentType::from_mime("application/pdf"), AttachmentType::Document);
    }
}
