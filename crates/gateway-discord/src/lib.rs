use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use gateway_channels::Channel;
use gateway_core::config::DiscordConfig;
use gateway_core::{GatewayError, InboundMessage, MessageType, OutboundMessage, Result};
use gateway_signatures::discord::verify_signature;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

const SEEN_INTERACTION_CAPACITY: usize = 10_000;
const INTERACTION_PING: i64 = 1;
const INTERACTION_APPLICATION_COMMAND: i64 = 2;

#[derive(Debug, Deserialize)]
struct Interaction {
    id: String,
    application_id: String,
    token: String,
    #[serde(rename = "type")]
    kind: i64,
    data: Option<InteractionData>,
    channel_id: Option<String>,
    member: Option<InteractionMember>,
    user: Option<InteractionUser>,
}

#[derive(Debug, Deserialize)]
struct InteractionMember {
    user: InteractionUser,
}

#[derive(Debug, Deserialize)]
struct InteractionUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InteractionData {
    name: String,
    #[serde(default)]
    options: Vec<InteractionOption>,
}

#[derive(Debug, Deserialize)]
struct InteractionOption {
    name: String,
    #[serde(default)]
    value: Value,
}

/// What the webhook handler should do with a verified interaction.
pub enum DiscordOutcome {
    /// Reply synchronously with `{"type":1}`.
    Pong,
    /// Reply synchronously with `{"type":5}` (deferred), then process
    /// `message` through the bus and edit the original response via
    /// [`DiscordAdapter::edit_original_response`] using `application_id`/
    /// `token` (valid 15 minutes).
    Deferred {
        application_id: String,
        token: String,
        message: InboundMessage,
    },
    /// Unknown interaction type or already-seen id — ack with 200, no
    /// further action.
    Ignored,
}

/// Discord channel adapter. Ingress is an HTTP interaction (slash
/// command); there is no persistent gateway connection. `send_message`
/// always returns `false` — v1 only supports replying to the interaction
/// that triggered processing, via [`Self::edit_original_response`].
pub struct DiscordAdapter {
    channel_id: String,
    public_key: String,
    bot_token: String,
    http: reqwest::Client,
    seen_interaction_ids: Mutex<(HashSet<String>, VecDeque<String>)>,
}

impl DiscordAdapter {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            channel_id: config.channel_id,
            public_key: config.public_key,
            bot_token: config.bot_token,
            http: reqwest::Client::new(),
            seen_interaction_ids: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    pub fn parse_interaction(&self, signature_hex: &str, timestamp: &str, body: &str) -> Result<DiscordOutcome> {
        if !verify_signature(&self.public_key, timestamp, body, signature_hex) {
            return Err(GatewayError::Authentication("invalid discord signature".into()));
        }

        let interaction: Interaction = serde_json::from_str(body)?;

        if interaction.kind == INTERACTION_PING {
            return Ok(DiscordOutcome::Pong);
        }
        if interaction.kind != INTERACTION_APPLICATION_COMMAND {
            return Ok(DiscordOutcome::Ignored);
        }

        if self.mark_seen_and_check_duplicate(&interaction.id) {
            return Ok(DiscordOutcome::Ignored);
        }

        let data = interaction
            .data
            .ok_or_else(|| GatewayError::Validation("missing interaction.data".into()))?;
        let text = render_command_text(&data);
        let raw: Value = serde_json::from_str(body).unwrap_or(Value::Null);

        let user_id = interaction
            .member
            .as_ref()
            .map(|m| m.user.id.clone())
            .or_else(|| interaction.user.as_ref().map(|u| u.id.clone()))
            .ok_or_else(|| GatewayError::Validation("missing interaction member/user id".into()))?;
        let conversation_id = interaction
            .channel_id
            .clone()
            .ok_or_else(|| GatewayError::Validation("missing interaction.channel_id".into()))?;

        let message = InboundMessage::new(
            self.channel_id.clone(),
            user_id,
            conversation_id,
            format!("discord_interaction_{}", interaction.id),
            chrono::Utc::now(),
            MessageType::Text,
            Some(text),
            vec![],
            None,
            raw,
        )?;

        Ok(DiscordOutcome::Deferred {
            application_id: interaction.application_id,
            token: interaction.token,
            message,
        })
    }

    fn mark_seen_and_check_duplicate(&self, interaction_id: &str) -> bool {
        let mut guard = self.seen_interaction_ids.lock().unwrap();
        let (seen, order) = &mut *guard;
        if seen.contains(interaction_id) {
            return true;
        }
        seen.insert(interaction_id.to_string());
        order.push_back(interaction_id.to_string());
        if order.len() > SEEN_INTERACTION_CAPACITY {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        false
    }

    /// Edits the deferred interaction response via the webhook API.
    /// `token` is only valid for 15 minutes after the original interaction.
    pub async fn edit_original_response(&self, application_id: &str, token: &str, text: &str) -> bool {
        let url = format!(
            "https://discord.com/api/v10/webhooks/{application_id}/{token}/messages/@original"
        );
        let result = self
            .http
            .patch(&url)
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(channel_id = %self.channel_id, "discord interaction response edited");
                true
            }
            Ok(resp) => {
                warn!(channel_id = %self.channel_id, status = %resp.status(), "discord edit failed");
                false
            }
            Err(e) => {
                warn!(channel_id = %self.channel_id, error = %e, "discord edit errored");
                false
            }
        }
    }
}

fn render_command_text(data: &InteractionData) -> String {
    let mut text = format!("/{}", data.name);
    for option in &data.options {
        let value = match &option.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!(" {}: {value}", option.name));
    }
    text
}

#[async_trait]
impl Channel for DiscordAdapter {
    fn get_channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn send_message(&self, _message: &OutboundMessage) -> bool {
        warn!(channel_id = %self.channel_id, "discord v1 adapter cannot push outbound, use edit_original_response");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signed(public_key_hex: &str, signing_key: &SigningKey, timestamp: &str, body: &str) -> String {
        let mut message = Vec::new();
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body.as_bytes());
        let signature = signing_key.sign(&message);
        let _ = public_key_hex;
        hex::encode(signature.to_bytes())
    }

    fn fixture() -> (DiscordAdapter, SigningKey) {
        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        let public_key_hex = hex::encode(signing_key.verifying_key().to_bytes());
        let adapter = DiscordAdapter::new(DiscordConfig {
            channel_id: "discord".into(),
            application_id: "app1".into(),
            public_key: public_key_hex,
            bot_token: "bot-token".into(),
        });
        (adapter, signing_key)
    }

    #[test]
    fn ping_returns_pong_outcome() {
        let (adapter, key) = fixture();
        let ts = "1700000000";
        let body = serde_json::json!({"id": "i1", "application_id": "app1", "token": "t1", "type": 1}).to_string();
        let sig = signed("", &key, ts, &body);
        assert!(matches!(adapter.parse_interaction(&sig, ts, &body).unwrap(), DiscordOutcome::Pong));
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let (adapter, _key) = fixture();
        let ts = "1700000000";
        let body = serde_json::json!({"id": "i1", "application_id": "app1", "token": "t1", "type": 1}).to_string();
        let err = adapter.parse_interaction("00", ts, &body).unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION");
    }

    #[test]
    fn application_command_renders_options_into_text() {
        let (adapter, key) = fixture();
        let ts = "1700000000";
        let body = serde_json::json!({
            "id": "i2",
            "application_id": "app1",
            "token": "t2",
            "type": 2,
            "channel_id": "c1",
            "member": {"user": {"id": "u1"}},
            "data": {
                "name": "deploy",
                "options": [{"name": "env", "value": "prod"}]
            }
        })
        .to_string();
        let sig = signed("", &key, ts, &body);
        match adapter.parse_interaction(&sig, ts, &body).unwrap() {
            DiscordOutcome::Deferred { message, application_id, token } => {
                assert_eq!(message.text.as_deref(), Some("/deploy env: prod"));
                assert_eq!(application_id, "app1");
                assert_eq!(token, "t2");
                assert_eq!(message.user_key, "u1");
                assert_eq!(message.conversation_key, "c1");
                assert_eq!(message.message_id, "discord_interaction_i2");
            }
            _ => panic!("expected deferred outcome"),
        }
    }

    #[test]
    fn duplicate_interaction_id_is_ignored() {
        let (adapter, key) = fixture();
        let ts = "1700000000";
        let body = serde_json::json!({
            "id": "i3",
            "application_id": "app1",
            "token": "t3",
            "type": 2,
            "channel_id": "c1",
            "member": {"user": {"id": "u1"}},
            "data": {"name": "ping", "options": []}
        })
        .to_string();
        let sig = signed("", &key, ts, &body);
        assert!(matches!(
            adapter.parse_interaction(&sig, ts, &body).unwrap(),
            DiscordOutcome::Deferred { .. }
        ));
        assert!(matches!(adapter.parse_interaction(&sig, ts, &body).unwrap(), DiscordOutcome::Ignored));
    }

    #[tokio::test]
    async fn send_message_always_returns_false() {
        let (adapter, _key) = fixture();
        let message = OutboundMessage::text("discord", "u1", "u1", "hi");
        assert!(!adapter.send_message(&message).await);
    }
}
