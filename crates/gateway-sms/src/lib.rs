use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use gateway_channels::Channel;
use gateway_core::config::SmsTwilioConfig;
use gateway_core::{GatewayError, InboundMessage, MessageType, OutboundMessage, Result};
use gateway_signatures::sms::verify_signature;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::{info, warn};

const MAX_SMS_LENGTH: usize = 480;
const SINGLE_SEGMENT_LIMIT: usize = 160;
const MULTI_SEGMENT_SIZE: usize = 153;
const SEEN_MESSAGE_SID_CAPACITY: usize = 10_000;

fn e164_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").unwrap())
}

/// Validates E.164 and returns the number of SMS segments the text would
/// be split into by a carrier (single-part up to 160 chars, 153-char
/// concatenated parts beyond that).
pub fn validate_outbound(to: &str, text: &str) -> Result<usize> {
    if !e164_pattern().is_match(to) {
        return Err(GatewayError::Validation(format!("{to} is not a valid E.164 number")));
    }
    if text.is_empty() {
        return Err(GatewayError::Validation("sms text must be non-empty".into()));
    }
    if text.chars().count() > MAX_SMS_LENGTH {
        return Err(GatewayError::Validation(format!(
            "sms text exceeds max length of {MAX_SMS_LENGTH} characters"
        )));
    }
    Ok(segment_count(text))
}

fn segment_count(text: &str) -> usize {
    let len = text.chars().count();
    if len <= SINGLE_SEGMENT_LIMIT {
        1
    } else {
        len.div_ceil(MULTI_SEGMENT_SIZE)
    }
}

/// Phone numbers never appear unhashed in logs or audit metadata.
pub fn hash_phone_number(phone: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phone.as_bytes());
    hex::encode(hasher.finalize())
}

/// Twilio SMS channel adapter. Inbound delivery is a webhook keyed by a
/// secret path token (matched by the HTTP boundary before this adapter
/// ever sees the request); outbound is a plain REST call over HTTP Basic.
pub struct SmsAdapter {
    channel_id: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    path_token: String,
    http: reqwest::Client,
    seen_message_sids: Mutex<(HashSet<String>, VecDeque<String>)>,
}

impl SmsAdapter {
    pub fn new(config: SmsTwilioConfig) -> Self {
        Self {
            channel_id: config.channel_id,
            account_sid: config.account_sid,
            auth_token: config.auth_token,
            from_number: config.from_number,
            path_token: config.path_token,
            http: reqwest::Client::new(),
            seen_message_sids: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    /// Secret path segment the webhook router uses to pick this adapter
    /// instance before any signature is checked.
    pub fn path_token(&self) -> &str {
        &self.path_token
    }

    /// Verifies the Twilio signature over `url` + sorted form params, then
    /// maps `MessageSid`/`From`/`Body` into an [`InboundMessage`]. Returns
    /// `Ok(None)` for an already-seen `MessageSid`.
    pub fn parse_event(
        &self,
        url: &str,
        signature_header: &str,
        params: &HashMap<String, String>,
    ) -> Result<Option<InboundMessage>> {
        let param_pairs: Vec<(String, String)> = params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if !verify_signature(&self.auth_token, url, &param_pairs, signature_header) {
            return Err(GatewayError::Authentication("invalid twilio sms signature".into()));
        }

        let message_sid = params
            .get("MessageSid")
            .ok_or_else(|| GatewayError::Validation("missing MessageSid".into()))?
            .clone();
        let from = params
            .get("From")
            .ok_or_else(|| GatewayError::Validation("missing From".into()))?
            .clone();
        let body = params.get("Body").cloned().unwrap_or_default();

        if self.mark_seen_and_check_duplicate(&message_sid) {
            info!(channel_id = %self.channel_id, "duplicate sms MessageSid ignored");
            return Ok(None);
        }

        let raw = serde_json::to_value(params).unwrap_or(serde_json::Value::Null);
        let inbound = InboundMessage::new(
            self.channel_id.clone(),
            from.clone(),
            from,
            message_sid,
            chrono::Utc::now(),
            MessageType::Text,
            Some(body),
            vec![],
            None,
            raw,
        )?;
        Ok(Some(inbound))
    }

    fn mark_seen_and_check_duplicate(&self, message_sid: &str) -> bool {
        let mut guard = self.seen_message_sids.lock().unwrap();
        let (seen, order) = &mut *guard;
        if seen.contains(message_sid) {
            return true;
        }
        seen.insert(message_sid.to_string());
        order.push_back(message_sid.to_string());
        if order.len() > SEEN_MESSAGE_SID_CAPACITY {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        false
    }
}

#[async_trait]
impl Channel for SmsAdapter {
    fn get_channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn send_message(&self, message: &OutboundMessage) -> bool {
        let Some(text) = &message.text else {
            warn!(channel_id = %self.channel_id, "sms adapter only supports text outbound");
            return false;
        };

        let segments = match validate_outbound(&message.user_key, text) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(channel_id = %self.channel_id, to_hash = %hash_phone_number(&message.user_key), error = %e, "sms validation failed");
                return false;
            }
        };

        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json", self.account_sid);
        let params = [("To", message.user_key.as_str()), ("From", self.from_number.as_str()), ("Body", text.as_str())];

        match self.http.post(&url).basic_auth(&self.account_sid, Some(&self.auth_token)).form(&params).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(channel_id = %self.channel_id, to_hash = %hash_phone_number(&message.user_key), segments, "sms sent");
                true
            }
            Ok(resp) => {
                warn!(channel_id = %self.channel_id, status = %resp.status(), to_hash = %hash_phone_number(&message.user_key), "sms send failed");
                false
            }
            Err(e) => {
                warn!(channel_id = %self.channel_id, error = %e, to_hash = %hash_phone_number(&message.user_key), "sms send errored");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_signatures::sms::compute_signature;

    fn adapter() -> SmsAdapter {
        SmsAdapter::new(SmsTwilioConfig {
            channel_id: "sms".into(),
            account_sid: "ACxxxx".into(),
            auth_token: "secret".into(),
            from_number: "+15551234567".into(),
            path_token: "tok_abc123".into(),
        })
    }

    fn signed_params(auth_token: &str, url: &str, params: &[(&str, &str)]) -> (HashMap<String, String>, String) {
        let owned: Vec<(String, String)> = params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let signature = compute_signature(auth_token, url, &owned);
        (owned.into_iter().collect(), signature)
    }

    #[test]
    fn validate_outbound_rejects_non_e164_numbers() {
        assert!(validate_outbound("5551234567", "hi").is_err());
        assert!(validate_outbound("+0551234567", "hi").is_err());
        assert!(validate_outbound("+15551234567", "hi").is_ok());
    }

    #[test]
    fn validate_outbound_rejects_text_over_max_length() {
        let too_long = "a".repeat(481);
        assert!(validate_outbound("+15551234567", &too_long).is_err());
    }

    #[test]
    fn segment_count_is_one_under_160_chars() {
        assert_eq!(validate_outbound("+15551234567", &"a".repeat(160)).unwrap(), 1);
    }

    #[test]
    fn segment_count_splits_into_153_char_parts_above_160() {
        assert_eq!(validate_outbound("+15551234567", &"a".repeat(161)).unwrap(), 2);
        assert_eq!(validate_outbound("+15551234567", &"a".repeat(306)).unwrap(), 2);
        assert_eq!(validate_outbound("+15551234567", &"a".repeat(307)).unwrap(), 3);
    }

    #[test]
    fn hash_phone_number_never_returns_the_raw_digits() {
        let hashed = hash_phone_number("+15551234567");
        assert!(!hashed.contains("5551234567"));
        assert_eq!(hashed.len(), 64);
    }

    #[test]
    fn parse_event_rejects_bad_signature() {
        let adapter = adapter();
        let url = "https://gateway.example.com/webhooks/sms/tok_abc123";
        let (params, _sig) = signed_params("secret", url, &[("MessageSid", "SM1"), ("From", "+15550000000"), ("Body", "hi")]);
        let err = adapter.parse_event(url, "bogus", &params).unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION");
    }

    #[test]
    fn parse_event_maps_from_and_body_into_inbound_message() {
        let adapter = adapter();
        let url = "https://gateway.example.com/webhooks/sms/tok_abc123";
        let (params, sig) = signed_params("secret", url, &[("MessageSid", "SM1"), ("From", "+15550000000"), ("Body", "hello")]);
        let inbound = adapter.parse_event(url, &sig, &params).unwrap().unwrap();
        assert_eq!(inbound.user_key, "+15550000000");
        assert_eq!(inbound.conversation_key, "+15550000000");
        assert_eq!(inbound.message_id, "SM1");
        assert_eq!(inbound.text.as_deref(), Some("hello"));
    }

    #[test]
    fn parse_event_ignores_duplicate_message_sid() {
        let adapter = adapter();
        let url = "https://gateway.example.com/webhooks/sms/tok_abc123";
        let (params, sig) = signed_params("secret", url, &[("MessageSid", "SM2"), ("From", "+15550000000"), ("Body", "hi")]);
        assert!(adapter.parse_event(url, &sig, &params).unwrap().is_some());
        assert!(adapter.parse_event(url, &sig, &params).unwrap().is_none());
    }

    #[tokio::test]
    async fn send_message_rejects_invalid_destination_number() {
        let adapter = adapter();
        let message = OutboundMessage::text("sms", "not-a-number", "not-a-number", "hi");
        assert!(!adapter.send_message(&message).await);
    }
}
