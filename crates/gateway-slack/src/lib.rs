use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_channels::Channel;
use gateway_core::config::SlackConfig;
use gateway_core::{GatewayError, InboundMessage, MessageType, OutboundMessage, Result};
use gateway_signatures::slack::verify_signature;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

const SEEN_EVENT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    DmOnly,
    MentionOrDm,
    AllMessages,
}

impl TriggerPolicy {
    pub fn parse(s: &str) -> Self {
        match s {
            "dm_only" => TriggerPolicy::DmOnly,
            "all_messages" => TriggerPolicy::AllMessages,
            _ => TriggerPolicy::MentionOrDm,
        }
    }
}

pub enum SlackParseOutcome {
    /// `url_verification` handshake — echo the challenge synchronously.
    Challenge(String),
    Message(InboundMessage),
    /// Filtered by bot-loop protection, trigger policy, or already seen.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct SlackEnvelope {
    #[serde(rename = "type")]
    kind: String,
    challenge: Option<String>,
    event_id: Option<String>,
    event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<String>,
    user: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    client_msg_id: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
}

/// Slack channel adapter. Must ack within 3 seconds, so
/// [`Self::parse_event`] is pure/synchronous — the webhook handler is
/// expected to enqueue the returned [`InboundMessage`] for async bus
/// processing rather than awaiting it inline.
pub struct SlackAdapter {
    channel_id: String,
    signing_secret: String,
    bot_token: String,
    trigger_policy: TriggerPolicy,
    http: reqwest::Client,
    seen_event_ids: Mutex<(HashSet<String>, VecDeque<String>)>,
}

impl SlackAdapter {
    pub fn new(config: SlackConfig) -> Self {
        let trigger_policy = TriggerPolicy::parse(&config.trigger_policy);
        Self {
            channel_id: config.channel_id,
            signing_secret: config.signing_secret,
            bot_token: config.bot_token,
            trigger_policy,
            http: reqwest::Client::new(),
            seen_event_ids: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    pub fn parse_event(
        &self,
        timestamp: &str,
        body: &str,
        signature_header: &str,
        now_epoch_s: i64,
    ) -> Result<SlackParseOutcome> {
        if !verify_signature(&self.signing_secret, timestamp, body, signature_header, now_epoch_s) {
            return Err(GatewayError::Authentication("invalid slack signature".into()));
        }

        let envelope: SlackEnvelope = serde_json::from_str(body)?;

        if envelope.kind == "url_verification" {
            let challenge = envelope
                .challenge
                .ok_or_else(|| GatewayError::Validation("missing challenge".into()))?;
            return Ok(SlackParseOutcome::Challenge(challenge));
        }

        if envelope.kind != "event_callback" {
            return Ok(SlackParseOutcome::Ignored);
        }
        let Some(event) = envelope.event else {
            return Ok(SlackParseOutcome::Ignored);
        };
        if event.kind != "message" && event.kind != "app_mention" {
            return Ok(SlackParseOutcome::Ignored);
        }
        if event.bot_id.is_some() || event.subtype.as_deref() == Some("bot_message") {
            return Ok(SlackParseOutcome::Ignored);
        }

        let channel = event
            .channel
            .clone()
            .ok_or_else(|| GatewayError::Validation("missing event.channel".into()))?;
        let is_dm = channel.starts_with('D');
        let is_mention = event.kind == "app_mention";

        let allowed = match self.trigger_policy {
            TriggerPolicy::DmOnly => is_dm,
            TriggerPolicy::MentionOrDm => is_dm || is_mention,
            TriggerPolicy::AllMessages => true,
        };
        if !allowed {
            return Ok(SlackParseOutcome::Ignored);
        }

        let event_id = envelope
            .event_id
            .clone()
            .or_else(|| event.client_msg_id.clone())
            .unwrap_or_else(|| {
                format!(
                    "{}_{}_{}",
                    event.ts.as_deref().unwrap_or("0"),
                    channel,
                    event.user.as_deref().unwrap_or("unknown")
                )
            });

        if self.mark_seen_and_check_duplicate(&event_id) {
            return Ok(SlackParseOutcome::Ignored);
        }

        let user = event
            .user
            .clone()
            .ok_or_else(|| GatewayError::Validation("missing event.user".into()))?;
        let ts = event.ts.clone().unwrap_or_default();
        let thread_ts = event.thread_ts.clone().filter(|t| t != &ts);
        let conversation_key = match &thread_ts {
            Some(thread) => format!("{channel}:{thread}"),
            None => channel.clone(),
        };

        let timestamp = parse_slack_ts(&ts).unwrap_or_else(Utc::now);
        let raw: Value = serde_json::from_str(body).unwrap_or(Value::Null);

        let inbound = InboundMessage::new(
            self.channel_id.clone(),
            user,
            conversation_key,
            format!("slack_{event_id}"),
            timestamp,
            MessageType::Text,
            event.text.clone(),
            vec![],
            None,
            raw,
        )?;
        Ok(SlackParseOutcome::Message(inbound))
    }

    /// Returns `true` if `event_id` had already been seen (and should be
    /// dropped). Bounded to [`SEEN_EVENT_CAPACITY`] entries; oldest is
    /// evicted on overflow.
    fn mark_seen_and_check_duplicate(&self, event_id: &str) -> bool {
        let mut guard = self.seen_event_ids.lock().unwrap();
        let (seen, order) = &mut *guard;
        if seen.contains(event_id) {
            return true;
        }
        seen.insert(event_id.to_string());
        order.push_back(event_id.to_string());
        if order.len() > SEEN_EVENT_CAPACITY {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        false
    }
}

fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = ts.parse().ok()?;
    DateTime::from_timestamp(seconds.trunc() as i64, ((seconds.fract()) * 1e9) as u32)
}

#[async_trait]
impl Channel for SlackAdapter {
    fn get_channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn send_message(&self, message: &OutboundMessage) -> bool {
        let Some(text) = &message.text else {
            warn!(channel_id = %self.channel_id, "slack adapter only supports text outbound");
            return false;
        };
        let (channel, thread_ts) = match message.conversation_key.split_once(':') {
            Some((channel, thread_ts)) => (channel.to_string(), Some(thread_ts.to_string())),
            None => (message.conversation_key.clone(), None),
        };

        let mut body = serde_json::json!({"channel": channel, "text": text});
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = Value::from(thread_ts);
        }

        let result = self
            .http
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(json) if json.get("ok").and_then(Value::as_bool).unwrap_or(false) => {
                    info!(channel_id = %self.channel_id, "slack message sent");
                    true
                }
                Ok(json) => {
                    warn!(channel_id = %self.channel_id, error = ?json.get("error"), "slack send rejected");
                    false
                }
                Err(e) => {
                    warn!(channel_id = %self.channel_id, error = %e, "slack response undecodable");
                    false
                }
            },
            Err(e) => {
                warn!(channel_id = %self.channel_id, error = %e, "slack send errored");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_signatures::slack::verify_signature as sig_verify;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn adapter(policy: &str) -> SlackAdapter {
        SlackAdapter::new(SlackConfig {
            channel_id: "slack".into(),
            signing_secret: "shhh".into(),
            bot_token: "xoxb-test".into(),
            trigger_policy: policy.to_string(),
        })
    }

    fn sign(secret: &str, ts: &str, body: &str) -> String {
        let basestring = format!("v0:{ts}:{body}");
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(basestring.as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_helper_agrees_with_verify_signature() {
        let ts = "1700000000";
        let body = "{}";
        let sig = sign("shhh", ts, body);
        assert!(sig_verify("shhh", ts, body, &sig, 1_700_000_010));
    }

    #[test]
    fn parse_event_handles_url_verification() {
        let adapter = adapter("all_messages");
        let ts = "1700000000";
        let body = serde_json::json!({"type": "url_verification", "challenge": "abc123"}).to_string();
        let sig = sign("shhh", ts, &body);
        match adapter.parse_event(ts, &body, &sig, 1_700_000_005).unwrap() {
            SlackParseOutcome::Challenge(c) => assert_eq!(c, "abc123"),
            _ => panic!("expected challenge"),
        }
    }

    fn message_event_body(channel: &str, kind: &str, text: &str) -> String {
        serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {
                "type": kind,
                "channel": channel,
                "user": "U1",
                "text": text,
                "ts": "1700000000.000100",
            }
        })
        .to_string()
    }

    #[test]
    fn mention_or_dm_policy_rejects_plain_channel_messages() {
        let adapter = adapter("mention_or_dm");
        let ts = "1700000000";
        let body = message_event_body("C123", "message", "hello");
        let sig = sign("shhh", ts, &body);
        let outcome = adapter.parse_event(ts, &body, &sig, 1_700_000_005).unwrap();
        assert!(matches!(outcome, SlackParseOutcome::Ignored));
    }

    #[test]
    fn mention_or_dm_policy_accepts_dms() {
        let adapter = adapter("mention_or_dm");
        let ts = "1700000000";
        let body = message_event_body("D123", "message", "hello");
        let sig = sign("shhh", ts, &body);
        let outcome = adapter.parse_event(ts, &body, &sig, 1_700_000_005).unwrap();
        assert!(matches!(outcome, SlackParseOutcome::Message(_)));
    }

    #[test]
    fn duplicate_event_id_is_ignored_on_second_delivery() {
        let adapter = adapter("all_messages");
        let ts = "1700000000";
        let body = message_event_body("C123", "message", "hello");
        let sig = sign("shhh", ts, &body);
        let first = adapter.parse_event(ts, &body, &sig, 1_700_000_005).unwrap();
        assert!(matches!(first, SlackParseOutcome::Message(_)));
        let second = adapter.parse_event(ts, &body, &sig, 1_700_000_005).unwrap();
        assert!(matches!(second, SlackParseOutcome::Ignored));
    }

    #[test]
    fn thread_reply_sets_composite_conversation_key() {
        let adapter = adapter("all_messages");
        let ts = "1700000000";
        let body = serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev2",
            "event": {
                "type": "message",
                "channel": "C123",
                "user": "U1",
                "text": "reply",
                "ts": "1700000001.000200",
                "thread_ts": "1700000000.000100",
            }
        })
        .to_string();
        let sig = sign("shhh", ts, &body);
        match adapter.parse_event(ts, &body, &sig, 1_700_000_005).unwrap() {
            SlackParseOutcome::Message(msg) => assert_eq!(msg.conversation_key, "C123:1700000000.000100"),
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn bot_message_subtype_is_ignored() {
        let adapter = adapter("all_messages");
        let ts = "1700000000";
        let body = serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev3",
            "event": {
                "type": "message",
                "channel": "C123",
                "user": "U1",
                "text": "hi",
                "ts": "1700000000.000100",
                "subtype": "bot_message",
            }
        })
        .to_string();
        let sig = sign("shhh", ts, &body);
        let outcome = adapter.parse_event(ts, &body, &sig, 1_700_000_005).unwrap();
        assert!(matches!(outcome, SlackParseOutcome::Ignored));
    }
}
