use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::Result;

use crate::envelope::EmailEnvelope;

#[derive(Debug, Clone)]
pub struct SendResult {
    pub provider_message_id: Option<String>,
    pub message_id: String,
}

/// Options for an outbound email, threaded as a unit so providers don't
/// grow a long positional parameter list.
#[derive(Debug, Clone, Default)]
pub struct OutboundEmail<'a> {
    pub to_addresses: &'a [String],
    pub subject: &'a str,
    pub text_body: Option<&'a str>,
    pub html_body: Option<&'a str>,
    pub in_reply_to: Option<&'a str>,
    pub references: Option<&'a str>,
    pub cc_addresses: Option<&'a [String]>,
}

/// Contract every email backend (plain IMAP/SMTP, Gmail API, Outlook Graph)
/// implements. The channel adapter and poller depend only on this trait.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn validate_credentials(&self) -> Result<()>;

    async fn fetch_messages(&self, folder: &str, since: DateTime<Utc>, limit: usize) -> Result<Vec<EmailEnvelope>>;

    async fn send_message(&self, email: OutboundEmail<'_>) -> Result<SendResult>;

    async fn mark_as_read(&self, provider_message_id: &str) -> Result<bool>;
}
