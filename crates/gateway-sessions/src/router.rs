use gateway_channels::{ChannelRegistry, SessionScope};
use gateway_core::{GatewayError, InboundMessage, Result};

const TITLE_HINT_MAX_CHARS: usize = 50;

/// Routing context resolved from an inbound message and its channel's
/// manifest. The session lookup key format is frozen v1 (ADR-014):
/// `{channel_id}:{user_key}` for `SessionScope::User`,
/// `{channel_id}:{user_key}:{conversation_key}` for
/// `SessionScope::UserConversation`. Changing either format is a breaking
/// change.
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub channel_id: String,
    pub user_key: String,
    pub conversation_key: String,
    pub session_scope: SessionScope,
    pub session_lookup_key: String,
    pub title_hint: Option<String>,
}

impl ResolvedContext {
    fn new(
        channel_id: String,
        user_key: String,
        conversation_key: String,
        session_scope: SessionScope,
        session_lookup_key: String,
        title_hint: Option<String>,
    ) -> Result<Self> {
        if channel_id.is_empty() || user_key.is_empty() || conversation_key.is_empty() || session_lookup_key.is_empty() {
            return Err(GatewayError::Validation(
                "channel_id, user_key, conversation_key and session_lookup_key must be non-empty".into(),
            ));
        }
        Ok(Self {
            channel_id,
            user_key,
            conversation_key,
            session_scope,
            session_lookup_key,
            title_hint,
        })
    }
}

/// Resolves which session an inbound message belongs to, based on its
/// channel's manifest `session_scope`.
pub struct SessionRouter<'a> {
    registry: &'a ChannelRegistry,
}

impl<'a> SessionRouter<'a> {
    pub fn new(registry: &'a ChannelRegistry) -> Self {
        Self { registry }
    }

    pub fn resolve(&self, message: &InboundMessage) -> Result<ResolvedContext> {
        let manifest = self
            .registry
            .get_manifest(&message.channel_id)
            .ok_or_else(|| GatewayError::ChannelNotFound(message.channel_id.clone()))?;

        let session_lookup_key = self.compute_lookup_key(
            &message.channel_id,
            &message.user_key,
            Some(&message.conversation_key),
        )?;

        let title_hint = message.text.as_ref().map(|text| {
            let truncated: String = text.chars().take(TITLE_HINT_MAX_CHARS).collect();
            let truncated = truncated.trim().to_string();
            if text.chars().count() > TITLE_HINT_MAX_CHARS {
                format!("{truncated}...")
            } else {
                truncated
            }
        });

        ResolvedContext::new(
            message.channel_id.clone(),
            message.user_key.clone(),
            message.conversation_key.clone(),
            manifest.session_scope,
            session_lookup_key,
            title_hint,
        )
    }

    pub fn compute_lookup_key(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: Option<&str>,
    ) -> Result<String> {
        let manifest = self
            .registry
            .get_manifest(channel_id)
            .ok_or_else(|| GatewayError::ChannelNotFound(channel_id.to_string()))?;

        match manifest.session_scope {
            SessionScope::User => Ok(format!("{channel_id}:{user_key}")),
            SessionScope::UserConversation => {
                let conversation_key = conversation_key.ok_or_else(|| {
                    GatewayError::Validation(
                        "conversation_key required for user_conversation scope".into(),
                    )
                })?;
                Ok(format!("{channel_id}:{user_key}:{conversation_key}"))
            }
        }
    }

    /// Parses a lookup key back into `(channel_id, user_key, conversation_key)`.
    /// `conversation_key` is `None` for `SessionScope::User` keys.
    pub fn parse_lookup_key(lookup_key: &str) -> Result<(String, String, Option<String>)> {
        let parts: Vec<&str> = lookup_key.splitn(3, ':').collect();
        if parts.len() < 2 {
            return Err(GatewayError::Validation(format!(
                "invalid lookup key format: {lookup_key}"
            )));
        }
        let channel_id = parts[0].to_string();
        let user_key = parts[1].to_string();
        let conversation_key = parts.get(2).map(|s| s.to_string());
        Ok((channel_id, user_key, conversation_key))
    }
}
